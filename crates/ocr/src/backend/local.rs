use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use lens_core::ReceiptDraft;

use super::{ReceiptImage, ReceiptSource};
use crate::error::AnalyzerError;
use crate::extract::{LineParser, RecognizedLine};

pub const LOCAL_BACKEND: &str = "local";

/// Blocking OCR engine producing one entry per text line.
pub trait LineRecognizer: Send + Sync {
    fn recognize(&self, image_path: &Path) -> Result<Vec<RecognizedLine>, AnalyzerError>;
}

// ── Fixed recognizer (always available, used for tests) ──────────────────────

/// Returns the same lines for every image.
#[derive(Debug, Clone, Default)]
pub struct FixedLines {
    pub lines: Vec<RecognizedLine>,
}

impl FixedLines {
    pub fn new(lines: Vec<RecognizedLine>) -> Self {
        Self { lines }
    }
}

impl LineRecognizer for FixedLines {
    fn recognize(&self, _image_path: &Path) -> Result<Vec<RecognizedLine>, AnalyzerError> {
        Ok(self.lines.clone())
    }
}

// ── Tesseract recognizer (optional, gated behind `tesseract` feature) ────────

#[cfg(feature = "tesseract")]
pub mod tesseract {
    use std::path::Path;

    use leptess::LepTess;

    use super::{LineRecognizer, LOCAL_BACKEND};
    use crate::error::AnalyzerError;
    use crate::extract::RecognizedLine;

    pub struct TesseractRecognizer {
        data_path: Option<String>,
        language: String,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, language: &str) -> Self {
            Self { data_path, language: language.to_string() }
        }
    }

    impl LineRecognizer for TesseractRecognizer {
        fn recognize(&self, image_path: &Path) -> Result<Vec<RecognizedLine>, AnalyzerError> {
            let engine = |e: &dyn std::fmt::Display| AnalyzerError::analysis(LOCAL_BACKEND, format!("Tesseract: {e}"));

            let mut lt = LepTess::new(self.data_path.as_deref(), &self.language).map_err(|e| engine(&e))?;
            lt.set_image(image_path).map_err(|e| engine(&e))?;

            let Some(boxes) = lt.get_component_boxes(leptess::capi::TessPageIteratorLevel_RIL_TEXTLINE, true)
            else {
                return Ok(Vec::new());
            };

            let mut lines = Vec::new();
            for b in &boxes {
                lt.set_rectangle(&b);
                let text = lt.get_utf8_text().map_err(|e| engine(&e))?;
                let confidence = lt.mean_text_conf() as f32 / 100.0;
                lines.push(RecognizedLine::new(text.trim(), confidence));
            }
            Ok(lines)
        }
    }
}

/// On-device OCR with per-line confidence and real item separation.
#[derive(Clone)]
pub struct LocalOcrBackend {
    recognizer: Arc<dyn LineRecognizer>,
    parser: LineParser,
}

impl std::fmt::Debug for LocalOcrBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalOcrBackend").field("parser", &self.parser).finish_non_exhaustive()
    }
}

impl LocalOcrBackend {
    pub fn new(recognizer: Arc<dyn LineRecognizer>, parser: LineParser) -> Self {
        Self { recognizer, parser }
    }
}

#[async_trait]
impl ReceiptSource for LocalOcrBackend {
    fn name(&self) -> &str {
        LOCAL_BACKEND
    }

    async fn read_receipt(&self, image: &ReceiptImage) -> Result<ReceiptDraft, AnalyzerError> {
        let recognizer = Arc::clone(&self.recognizer);
        let path = image.path().to_path_buf();

        let lines = tokio::task::spawn_blocking(move || recognizer.recognize(&path))
            .await
            .map_err(|e| AnalyzerError::analysis(LOCAL_BACKEND, format!("OCR task panicked: {e}")))??;

        if lines.iter().all(|l| l.text.trim().is_empty()) {
            return Err(AnalyzerError::analysis(LOCAL_BACKEND, "No text detected in image"));
        }
        tracing::debug!(lines = lines.len(), "local OCR finished");

        self.parser
            .parse(&lines)
            .map_err(|e| AnalyzerError::analysis(LOCAL_BACKEND, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use lens_core::{Category, Money};

    use crate::locale::Locale;
    use crate::validate::Today;

    fn backend(lines: &[(&str, f32)]) -> LocalOcrBackend {
        let recognized = lines.iter().map(|(t, c)| RecognizedLine::new(*t, *c)).collect();
        let parser = LineParser::new(Arc::new(Locale::spanish()), 0.7, 0.6)
            .with_today(Today::Fixed(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        LocalOcrBackend::new(Arc::new(FixedLines::new(recognized)), parser)
    }

    fn image() -> ReceiptImage {
        ReceiptImage::new("/scratch/receipt.jpg")
    }

    #[tokio::test]
    async fn lines_become_categorised_items() {
        let b = backend(&[
            ("ALCAMPO", 0.9),
            ("AGUA MINERAL 0,45", 0.85),
            ("DETERGENTE 3,10", 0.8),
            ("TOTAL 3,55", 0.9),
        ]);
        let draft = b.read_receipt(&image()).await.unwrap();
        assert_eq!(draft.store_name, "Alcampo");
        assert_eq!(draft.items.len(), 2);
        assert_eq!(draft.items[0].category, Category::Beverages);
        assert_eq!(draft.items[1].category, Category::Cleaning);
        assert_eq!(draft.total_amount, Money::from_cents(355));
        assert_eq!(draft.purchase_date, NaiveDate::from_ymd_opt(2025, 1, 1));
    }

    #[tokio::test]
    async fn blank_output_is_analysis_error() {
        let err = backend(&[("  ", 0.9)]).read_receipt(&image()).await.unwrap_err();
        assert!(err.to_string().contains("No text detected"), "{err}");
        assert_eq!(err.backend(), Some(LOCAL_BACKEND));
    }

    #[tokio::test]
    async fn nothing_usable_is_recoverable() {
        let err = backend(&[("GRACIAS POR SU VISITA", 0.9)]).read_receipt(&image()).await.unwrap_err();
        assert!(err.is_recoverable());
    }

    struct Broken;

    impl LineRecognizer for Broken {
        fn recognize(&self, _image_path: &Path) -> Result<Vec<RecognizedLine>, AnalyzerError> {
            Err(AnalyzerError::analysis(LOCAL_BACKEND, "engine not initialised"))
        }
    }

    #[tokio::test]
    async fn recognizer_errors_propagate() {
        let parser = LineParser::new(Arc::new(Locale::spanish()), 0.7, 0.6);
        let b = LocalOcrBackend::new(Arc::new(Broken), parser);
        let err = b.read_receipt(&image()).await.unwrap_err();
        assert!(err.to_string().contains("engine not initialised"));
    }
}
