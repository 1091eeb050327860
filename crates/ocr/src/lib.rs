pub mod backend;
pub mod config;
pub mod contour;
pub mod enhance;
pub mod error;
pub mod extract;
pub mod locale;
pub mod pipeline;
pub mod preprocess;
pub mod registry;
pub mod validate;

pub use backend::{Backend, BackendKind, MockBackend, ReceiptImage, ReceiptSource};
pub use config::{AnalyzerConfig, LocalOcrConfig, PreprocessConfig, ProviderConfig};
pub use error::{AnalyzerError, Stage};
pub use extract::{LineParser, ParseMode, RecognizedLine, TextParser};
pub use locale::Locale;
pub use pipeline::{UploadOrchestrator, UploadRequest, UploadedImage};
pub use preprocess::{crop, merge_vertical, Preprocessor};
pub use registry::{list_providers, BackendRegistry, ProviderId};
pub use validate::{ResponseValidator, Today};
