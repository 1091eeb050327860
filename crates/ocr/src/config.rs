use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lens_core::Money;
use serde::{Deserialize, Serialize};

use crate::error::AnalyzerError;
use crate::extract::ParseMode;
use crate::locale::Locale;
use crate::validate::{ResponseValidator, Today};

/// Settings for one remote provider, `[providers.<id>]` in TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub credential: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// OCR language hint, for the text-detection providers that take one.
    pub language: Option<String>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalOcrConfig {
    /// Directory holding `*.traineddata`; the engine default when unset.
    pub data_path: Option<String>,
    pub language: String,
    pub store_confidence: f32,
    pub item_confidence: f32,
}

impl Default for LocalOcrConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            language: "spa".to_string(),
            store_confidence: 0.7,
            item_confidence: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub crop_margin: u32,
    pub merge_spacing: u32,
    pub enhance: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self { crop_margin: 10, merge_spacing: 20, enhance: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub provider: String,
    pub fallback_provider: Option<String>,
    pub max_upload_mb: u64,
    pub allowed_extensions: Vec<String>,
    pub timeout_secs: u64,
    pub tolerance: Money,
    pub parse_mode: ParseMode,
    pub preprocess: PreprocessConfig,
    pub providers: HashMap<String, ProviderConfig>,
    pub local: LocalOcrConfig,
    /// Replaces the built-in Spanish vocabulary when present.
    pub locale: Option<Locale>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            provider: "claude".to_string(),
            fallback_provider: Some("local".to_string()),
            max_upload_mb: 10,
            allowed_extensions: ["jpg", "jpeg", "png", "webp", "gif"].iter().map(|e| e.to_string()).collect(),
            timeout_secs: 60,
            tolerance: Money::from_cents(10),
            parse_mode: ParseMode::Lenient,
            preprocess: PreprocessConfig::default(),
            providers: HashMap::new(),
            local: LocalOcrConfig::default(),
            locale: None,
        }
    }
}

impl AnalyzerConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, AnalyzerError> {
        toml::from_str(toml_content)
            .map_err(|e| AnalyzerError::Configuration(format!("Failed to parse TOML: {e}")))
    }

    /// Settings for `provider`; an empty section when none is configured.
    pub fn provider_config(&self, provider: &str) -> ProviderConfig {
        self.providers
            .get(&provider.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn locale(&self) -> Arc<Locale> {
        Arc::new(self.locale.clone().unwrap_or_default())
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validator(&self, today: Today) -> ResponseValidator {
        ResponseValidator::new(self.tolerance).with_today(today)
    }

    /// Case-insensitive check of a file name's extension against the allow-list.
    pub fn is_allowed_file(&self, file_name: &str) -> bool {
        let Some((_, ext)) = file_name.rsplit_once('.') else {
            return false;
        };
        self.allowed_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_upload_limits() {
        let c = AnalyzerConfig::default();
        assert_eq!(c.max_upload_bytes(), 10 * 1024 * 1024);
        assert_eq!(c.timeout(), Duration::from_secs(60));
        assert_eq!(c.preprocess.merge_spacing, 20);
        assert!(c.is_allowed_file("ticket.JPG"));
        assert!(c.is_allowed_file("scan.webp"));
        assert!(!c.is_allowed_file("notes.pdf"));
        assert!(!c.is_allowed_file("jpg"));
    }

    #[test]
    fn parses_partial_toml() {
        let toml = r#"
            provider = "google_vision"
            fallback_provider = "ocrspace"
            tolerance = "0.25"
            parse_mode = "strict"

            [providers.google_vision]
            credential = "g-key"

            [providers.ocrspace]
            language = "eng"

            [local]
            language = "eng"

            [preprocess]
            enhance = true
        "#;
        let c = AnalyzerConfig::from_toml(toml).unwrap();
        assert_eq!(c.provider, "google_vision");
        assert_eq!(c.fallback_provider.as_deref(), Some("ocrspace"));
        assert_eq!(c.tolerance, Money::from_cents(25));
        assert_eq!(c.parse_mode, ParseMode::Strict);
        assert_eq!(c.provider_config("GOOGLE_VISION").credential.as_deref(), Some("g-key"));
        assert_eq!(c.provider_config("claude"), ProviderConfig::default());
        assert_eq!(c.local.language, "eng");
        assert_eq!(c.local.item_confidence, 0.6);
        assert!(c.preprocess.enhance);
        assert_eq!(c.preprocess.crop_margin, 10);
        assert_eq!(c.max_upload_mb, 10);
    }

    #[test]
    fn locale_table_replaces_default() {
        let toml = r#"
            [locale]
            total_markers = ["summe"]
        "#;
        let c = AnalyzerConfig::from_toml(toml).unwrap();
        assert!(c.locale().is_total_line("SUMME 3,00"));
        assert!(!c.locale().is_total_line("TOTAL 3,00"));
        assert!(AnalyzerConfig::default().locale().is_total_line("TOTAL 3,00"));
    }

    #[test]
    fn bad_toml_is_configuration_error() {
        let err = AnalyzerConfig::from_toml("max_upload_mb = \"lots\"").unwrap_err();
        assert!(matches!(err, AnalyzerError::Configuration(_)));
    }
}
