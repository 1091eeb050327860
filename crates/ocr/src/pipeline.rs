use std::path::Path;
use std::sync::Arc;

use lens_core::StructuredReceipt;
use tempfile::TempDir;

use crate::backend::{Backend, ReceiptImage};
use crate::config::AnalyzerConfig;
use crate::error::{AnalyzerError, Stage};
use crate::preprocess::{self, Preprocessor};
use crate::registry::{BackendRegistry, ProviderId};

/// One uploaded photo of (part of) a receipt.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadedImage {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { file_name: file_name.into(), bytes }
    }

    pub async fn from_path(path: &Path) -> Result<Self, AnalyzerError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(Self { file_name, bytes })
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub images: Vec<UploadedImage>,
    /// Overrides the configured primary provider.
    pub provider: Option<String>,
    pub credential: Option<String>,
}

impl UploadRequest {
    pub fn new(images: Vec<UploadedImage>) -> Self {
        Self { images, ..Self::default() }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }
}

/// validate input → preprocess → primary backend → at most one fallback.
pub struct UploadOrchestrator {
    registry: Arc<BackendRegistry>,
    preprocessor: Preprocessor,
}

impl UploadOrchestrator {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        let preprocessor = Preprocessor::new(registry.config().preprocess.clone());
        Self { registry, preprocessor }
    }

    fn config(&self) -> &AnalyzerConfig {
        self.registry.config()
    }

    pub async fn process(&self, request: UploadRequest) -> Result<StructuredReceipt, AnalyzerError> {
        let UploadRequest { images, provider, credential } = request;
        let provider = provider.unwrap_or_else(|| self.config().provider.clone());

        tracing::info!(stage = %Stage::ValidateInput, images = images.len(), "upload received");
        self.validate_input(&images).map_err(|e| {
            tracing::error!(stage = %Stage::ValidateInput, error = %e, "rejected upload");
            e
        })?;

        let primary = self.registry.get(&provider, credential.as_deref()).map_err(|e| {
            tracing::error!(stage = %Stage::Failed, backend = %provider, error = %e, "primary backend unavailable");
            e
        })?;
        let fallback = self.fallback_for(&provider);

        // Dropped on every exit path, taking the scratch files with it.
        let scratch = TempDir::new()?;

        tracing::info!(stage = %Stage::Preprocess, "preparing images");
        let image = self.preprocess(images, scratch.path()).await.map_err(|e| {
            tracing::error!(stage = %Stage::Preprocess, error = %e, "preprocessing failed");
            e
        })?;

        tracing::info!(stage = %Stage::AnalyzePrimary, backend = primary.name(), "analyzing");
        let primary_error = match primary.analyze(&image).await {
            Ok(receipt) => {
                tracing::info!(stage = %Stage::Done, backend = primary.name(), items = receipt.items().len(), "receipt analyzed");
                return Ok(receipt);
            }
            Err(e) => e,
        };

        let fallback = match fallback {
            Some(fallback) if primary_error.is_recoverable() => fallback,
            _ => {
                tracing::error!(stage = %Stage::AnalyzePrimary, backend = primary.name(), error = %primary_error, "analysis failed");
                return Err(primary_error);
            }
        };

        tracing::warn!(
            stage = %Stage::AnalyzeFallback,
            backend = fallback.name(),
            primary = primary.name(),
            error = %primary_error,
            "primary analysis failed, trying fallback"
        );
        match fallback.analyze(&image).await {
            Ok(receipt) => {
                tracing::info!(stage = %Stage::Done, backend = fallback.name(), items = receipt.items().len(), "receipt analyzed by fallback");
                Ok(receipt)
            }
            Err(fallback_error) => {
                tracing::error!(stage = %Stage::AnalyzeFallback, backend = fallback.name(), error = %fallback_error, "fallback failed");
                Err(AnalyzerError::FallbackFailed {
                    stage: Stage::AnalyzeFallback,
                    backend: fallback.name().to_string(),
                    primary: Box::new(primary_error),
                    fallback: Box::new(fallback_error),
                })
            }
        }
    }

    /// Configured fallback, unless it is missing, the primary itself, or cannot
    /// be constructed.
    fn fallback_for(&self, primary: &str) -> Option<Arc<Backend>> {
        let name = self.config().fallback_provider.as_deref()?;
        let id = match name.parse::<ProviderId>() {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(fallback = name, error = %e, "ignoring fallback provider");
                return None;
            }
        };
        if primary.parse::<ProviderId>().ok() == Some(id) {
            return None;
        }
        match self.registry.get(id.as_str(), None) {
            Ok(backend) => Some(backend),
            Err(e) => {
                tracing::warn!(fallback = %id, error = %e, "fallback backend unavailable");
                None
            }
        }
    }

    fn validate_input(&self, images: &[UploadedImage]) -> Result<(), AnalyzerError> {
        if images.is_empty() {
            return Err(AnalyzerError::Input("No images provided".to_string()));
        }
        let config = self.config();
        for image in images {
            if !config.is_allowed_file(&image.file_name) {
                return Err(AnalyzerError::Input(format!(
                    "File type not allowed: {} (allowed: {})",
                    image.file_name,
                    config.allowed_extensions.join(", ")
                )));
            }
            if image.bytes.is_empty() {
                return Err(AnalyzerError::Input(format!("{} is empty", image.file_name)));
            }
            if image.bytes.len() as u64 > config.max_upload_bytes() {
                return Err(AnalyzerError::Input(format!(
                    "{} exceeds the {} MB upload limit",
                    image.file_name, config.max_upload_mb
                )));
            }
        }
        Ok(())
    }

    /// Decode, crop, merge and write to `dir`, off the async runtime.
    async fn preprocess(&self, images: Vec<UploadedImage>, dir: &Path) -> Result<ReceiptImage, AnalyzerError> {
        let preprocessor = self.preprocessor.clone();
        let dir = dir.to_path_buf();
        let path = tokio::task::spawn_blocking(move || {
            let decoded = images
                .iter()
                .map(|i| preprocess::decode(&i.file_name, &i.bytes))
                .collect::<Result<Vec<_>, _>>()?;
            preprocessor.prepare_to(&decoded, &dir)
        })
        .await
        .map_err(|e| AnalyzerError::Io(std::io::Error::other(format!("Preprocessing task failed: {e}"))))??;

        Ok(ReceiptImage::new(path))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
