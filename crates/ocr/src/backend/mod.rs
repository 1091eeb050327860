//! Interchangeable recognition backends.
//!
//! Every variant turns a prepared receipt image into a [`ReceiptDraft`]; the
//! [`Backend`] wrapper adds the per-call timeout and runs the
//! [`ResponseValidator`] on whatever the variant produced.

pub mod local;
pub mod text_detection;
pub mod vision;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lens_core::{ReceiptDraft, StructuredReceipt};

use crate::error::AnalyzerError;
use crate::validate::ResponseValidator;

pub use local::{FixedLines, LineRecognizer, LocalOcrBackend};
pub use text_detection::{TextDetectionBackend, TextService};
pub use vision::{VisionBackend, VisionDialect};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A preprocessed image on disk, inside the request's scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptImage {
    path: PathBuf,
}

impl ReceiptImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    pub async fn read(&self) -> Result<Vec<u8>, AnalyzerError> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

/// The one capability every backend variant shares.
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    fn name(&self) -> &str;

    async fn read_receipt(&self, image: &ReceiptImage) -> Result<ReceiptDraft, AnalyzerError>;
}

pub enum BackendKind {
    Vision(VisionBackend),
    TextDetection(TextDetectionBackend),
    Local(LocalOcrBackend),
    Mock(MockBackend),
}

impl BackendKind {
    fn source(&self) -> &dyn ReceiptSource {
        match self {
            BackendKind::Vision(b) => b,
            BackendKind::TextDetection(b) => b,
            BackendKind::Local(b) => b,
            BackendKind::Mock(b) => b,
        }
    }
}

pub struct Backend {
    kind: BackendKind,
    timeout: Duration,
    validator: ResponseValidator,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Backend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            timeout: DEFAULT_TIMEOUT,
            validator: ResponseValidator::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_validator(mut self, validator: ResponseValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn name(&self) -> &str {
        self.kind.source().name()
    }

    /// Reads the receipt and validates the result. A timeout counts as a
    /// recoverable analysis failure.
    pub async fn analyze(&self, image: &ReceiptImage) -> Result<StructuredReceipt, AnalyzerError> {
        let source = self.kind.source();
        let name = source.name();
        tracing::info!(backend = name, image = %image.path().display(), "analyzing receipt");

        let draft = match tokio::time::timeout(self.timeout, source.read_receipt(image)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AnalyzerError::analysis(
                    name,
                    format!("timed out after {} seconds", self.timeout.as_secs_f32()),
                ))
            }
        };

        self.validator.validate(name, draft)
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

#[derive(Debug, Clone)]
enum MockOutcome {
    Draft(ReceiptDraft),
    Failure(String),
}

/// Returns a preset draft or a preset analysis failure, counting calls.
#[derive(Debug, Clone)]
pub struct MockBackend {
    name: String,
    outcome: MockOutcome,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockBackend {
    pub fn returning(name: impl Into<String>, draft: ReceiptDraft) -> Self {
        Self::with_outcome(name, MockOutcome::Draft(draft))
    }

    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_outcome(name, MockOutcome::Failure(message.into()))
    }

    fn with_outcome(name: impl Into<String>, outcome: MockOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::default(),
        }
    }

    /// Sleeps before answering; used to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared counter of `read_receipt` calls, valid after the mock is moved.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Shared list of image paths this mock was asked to read.
    pub fn seen_images(&self) -> Arc<Mutex<Vec<PathBuf>>> {
        Arc::clone(&self.seen)
    }
}

#[async_trait]
impl ReceiptSource for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_receipt(&self, image: &ReceiptImage) -> Result<ReceiptDraft, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(image.path().to_path_buf());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.outcome {
            MockOutcome::Draft(draft) => Ok(draft.clone()),
            MockOutcome::Failure(message) => Err(AnalyzerError::analysis(&self.name, message.clone())),
        }
    }
}
