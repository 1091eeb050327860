use std::fmt;

use lens_core::ValidationError;
use thiserror::Error;

/// Where in the upload state machine a request currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ValidateInput,
    Preprocess,
    AnalyzePrimary,
    AnalyzeFallback,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::ValidateInput => write!(f, "validate_input"),
            Stage::Preprocess => write!(f, "preprocess"),
            Stage::AnalyzePrimary => write!(f, "analyze_primary"),
            Stage::AnalyzeFallback => write!(f, "analyze_fallback"),
            Stage::Done => write!(f, "done"),
            Stage::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Invalid input: {0}")]
    Input(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("{backend} analysis failed: {message}")]
    Analysis { backend: String, message: String },
    #[error("{backend} returned an invalid receipt: {source}")]
    Validation {
        backend: String,
        #[source]
        source: ValidationError,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{stage} failed on {backend} after primary error ({primary}): {fallback}")]
    FallbackFailed {
        stage: Stage,
        backend: String,
        primary: Box<AnalyzerError>,
        fallback: Box<AnalyzerError>,
    },
}

impl AnalyzerError {
    pub fn analysis(backend: &str, message: impl Into<String>) -> Self {
        AnalyzerError::Analysis {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    /// Analysis and validation failures are worth one attempt on a fallback backend.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AnalyzerError::Analysis { .. } | AnalyzerError::Validation { .. })
    }

    /// Name of the backend that produced the error, if any.
    pub fn backend(&self) -> Option<&str> {
        match self {
            AnalyzerError::Analysis { backend, .. }
            | AnalyzerError::Validation { backend, .. }
            | AnalyzerError::FallbackFailed { backend, .. } => Some(backend),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_backend_failures_are_recoverable() {
        assert!(AnalyzerError::analysis("claude", "timeout").is_recoverable());
        assert!(AnalyzerError::Validation {
            backend: "ocrspace".into(),
            source: ValidationError::NoItems,
        }
        .is_recoverable());
        assert!(!AnalyzerError::Input("bad".into()).is_recoverable());
        assert!(!AnalyzerError::Configuration("missing key".into()).is_recoverable());
        assert!(!AnalyzerError::Io(std::io::Error::other("disk")).is_recoverable());
    }

    #[test]
    fn fallback_failure_reports_stage_and_backend() {
        let err = AnalyzerError::FallbackFailed {
            stage: Stage::AnalyzeFallback,
            backend: "local".into(),
            primary: Box::new(AnalyzerError::analysis("claude", "HTTP 500")),
            fallback: Box::new(AnalyzerError::analysis("local", "no items")),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("analyze_fallback failed on local"), "{msg}");
        assert!(msg.contains("HTTP 500"), "{msg}");
        assert_eq!(err.backend(), Some("local"));
        assert!(!err.is_recoverable());
    }
}
