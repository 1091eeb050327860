use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{Backend, BackendKind, LineRecognizer, LocalOcrBackend, TextDetectionBackend, VisionBackend};
use crate::config::AnalyzerConfig;
use crate::error::AnalyzerError;
use crate::extract::{LineParser, TextParser};
use crate::locale::Locale;
use crate::validate::Today;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    Claude,
    OpenAi,
    Grok,
    GoogleVision,
    OcrSpace,
    Local,
}

impl ProviderId {
    pub const ALL: [ProviderId; 6] = [
        ProviderId::Claude,
        ProviderId::OpenAi,
        ProviderId::Grok,
        ProviderId::GoogleVision,
        ProviderId::OcrSpace,
        ProviderId::Local,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::Claude => "claude",
            ProviderId::OpenAi => "openai",
            ProviderId::Grok => "grok",
            ProviderId::GoogleVision => "google_vision",
            ProviderId::OcrSpace => "ocrspace",
            ProviderId::Local => "local",
        }
    }

    /// Whether construction fails without a credential.
    pub fn requires_credential(self) -> bool {
        matches!(
            self,
            ProviderId::Claude | ProviderId::OpenAi | ProviderId::Grok | ProviderId::GoogleVision
        )
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = AnalyzerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ProviderId::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AnalyzerError::Configuration(format!("Unknown provider: {wanted}")))
    }
}

pub fn list_providers() -> Vec<ProviderId> {
    ProviderId::ALL.to_vec()
}

type CacheKey = (ProviderId, String);

/// Provider + credential → shared backend instance.
///
/// The lock is only held for lookups and inserts; backends are built outside
/// it, and when two callers race the first insert wins.
pub struct BackendRegistry {
    config: AnalyzerConfig,
    locale: Arc<Locale>,
    today: Today,
    line_recognizer: Option<Arc<dyn LineRecognizer>>,
    cache: Mutex<HashMap<CacheKey, Arc<Backend>>>,
}

impl BackendRegistry {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            locale: config.locale(),
            config,
            today: Today::System,
            line_recognizer: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_today(mut self, today: Today) -> Self {
        self.today = today;
        self
    }

    /// Engine for the `local` provider, replacing the Tesseract default.
    pub fn with_line_recognizer(mut self, recognizer: Arc<dyn LineRecognizer>) -> Self {
        self.line_recognizer = Some(recognizer);
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Cached backend for `provider`, building it on first use.
    pub fn get(&self, provider: &str, credential: Option<&str>) -> Result<Arc<Backend>, AnalyzerError> {
        let id: ProviderId = provider.parse()?;
        let credential = self.resolve_credential(id, credential);
        let key = cache_key(id, credential.as_deref());

        if let Some(backend) = self.lock().get(&key) {
            return Ok(Arc::clone(backend));
        }

        let built = Arc::new(self.build(id, credential)?);
        tracing::info!(provider = %id, "backend created");
        Ok(Arc::clone(self.lock().entry(key).or_insert(built)))
    }

    /// Seeds the cache with a ready-made backend, replacing any cached one.
    /// The credential resolves the same way as in `get`.
    pub fn register(&self, provider: ProviderId, credential: Option<&str>, backend: Backend) -> Arc<Backend> {
        let backend = Arc::new(backend);
        let credential = self.resolve_credential(provider, credential);
        self.lock().insert(cache_key(provider, credential.as_deref()), Arc::clone(&backend));
        backend
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<Backend>>> {
        // The map stays consistent even if a holder panicked.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn resolve_credential(&self, id: ProviderId, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(str::to_string)
            .or_else(|| self.config.provider_config(id.as_str()).credential)
            .filter(|c| !c.trim().is_empty())
    }

    fn build(&self, id: ProviderId, credential: Option<String>) -> Result<Backend, AnalyzerError> {
        let mut provider = self.config.provider_config(id.as_str());
        provider.credential = credential;
        let timeout = self.config.timeout();
        let locale = Arc::clone(&self.locale);
        let text_parser = || TextParser::new(Arc::clone(&locale), self.config.parse_mode).with_today(self.today);

        let kind = match id {
            ProviderId::Claude => BackendKind::Vision(VisionBackend::claude(&provider, timeout, Arc::clone(&locale))?),
            ProviderId::OpenAi => BackendKind::Vision(VisionBackend::openai(&provider, timeout, Arc::clone(&locale))?),
            ProviderId::Grok => BackendKind::Vision(VisionBackend::grok(&provider, timeout, Arc::clone(&locale))?),
            ProviderId::GoogleVision => {
                BackendKind::TextDetection(TextDetectionBackend::google_vision(&provider, timeout, text_parser())?)
            }
            ProviderId::OcrSpace => {
                BackendKind::TextDetection(TextDetectionBackend::ocr_space(&provider, timeout, text_parser())?)
            }
            ProviderId::Local => {
                let local = &self.config.local;
                let parser = LineParser::new(Arc::clone(&locale), local.store_confidence, local.item_confidence)
                    .with_today(self.today);
                BackendKind::Local(LocalOcrBackend::new(self.local_recognizer()?, parser))
            }
        };

        Ok(Backend::new(kind)
            .with_timeout(timeout)
            .with_validator(self.config.validator(self.today)))
    }

    fn local_recognizer(&self) -> Result<Arc<dyn LineRecognizer>, AnalyzerError> {
        if let Some(recognizer) = &self.line_recognizer {
            return Ok(Arc::clone(recognizer));
        }
        #[cfg(feature = "tesseract")]
        {
            let local = &self.config.local;
            Ok(Arc::new(crate::backend::local::tesseract::TesseractRecognizer::new(
                local.data_path.clone(),
                &local.language,
            )))
        }
        #[cfg(not(feature = "tesseract"))]
        {
            Err(AnalyzerError::Configuration(
                "Local OCR not available: build with the `tesseract` feature".to_string(),
            ))
        }
    }
}

fn cache_key(id: ProviderId, credential: Option<&str>) -> CacheKey {
    (id, credential.unwrap_or("default").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FixedLines;
    use crate::config::ProviderConfig;

    fn registry() -> BackendRegistry {
        BackendRegistry::new(AnalyzerConfig::default())
    }

    #[test]
    fn provider_ids_parse_case_insensitively() {
        assert_eq!("CLAUDE".parse::<ProviderId>().unwrap(), ProviderId::Claude);
        assert_eq!(" google_vision ".parse::<ProviderId>().unwrap(), ProviderId::GoogleVision);
        assert!(matches!("tesseract".parse::<ProviderId>(), Err(AnalyzerError::Configuration(_))));
        let names: Vec<&str> = list_providers().into_iter().map(ProviderId::as_str).collect();
        assert_eq!(names, vec!["claude", "openai", "grok", "google_vision", "ocrspace", "local"]);
    }

    #[test]
    fn same_key_returns_same_instance() {
        let r = registry();
        let a = r.get("claude", Some("k1")).unwrap();
        let b = r.get("Claude", Some("k1")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn different_credentials_or_providers_are_distinct() {
        let r = registry();
        let a = r.get("claude", Some("k1")).unwrap();
        let b = r.get("claude", Some("k2")).unwrap();
        let c = r.get("openai", Some("k1")).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.name(), "openai");
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn missing_credential_is_configuration_error() {
        let r = registry();
        for provider in ProviderId::ALL.into_iter().filter(|p| p.requires_credential()) {
            let err = r.get(provider.as_str(), None).unwrap_err();
            assert!(matches!(err, AnalyzerError::Configuration(_)), "{provider}: {err}");
        }
        assert!(r.is_empty());
        assert!(!ProviderId::OcrSpace.requires_credential());
    }

    #[test]
    fn ocr_space_uses_default_key() {
        let r = registry();
        let a = r.get("ocrspace", None).unwrap();
        let b = r.get("ocrspace", Some("default")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn configured_credential_is_used() {
        let mut config = AnalyzerConfig::default();
        config.providers.insert(
            "grok".into(),
            ProviderConfig { credential: Some("xai-key".into()), ..Default::default() },
        );
        let r = BackendRegistry::new(config);
        let a = r.get("grok", None).unwrap();
        let b = r.get("grok", Some("xai-key")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[cfg(not(feature = "tesseract"))]
    #[test]
    fn local_without_engine_is_configuration_error() {
        assert!(matches!(registry().get("local", None), Err(AnalyzerError::Configuration(_))));
    }

    #[test]
    fn local_with_injected_recognizer() {
        let r = registry().with_line_recognizer(Arc::new(FixedLines::default()));
        assert_eq!(r.get("local", None).unwrap().name(), "local");
    }

    #[test]
    fn clear_empties_cache() {
        let r = registry();
        let a = r.get("ocrspace", None).unwrap();
        r.clear();
        assert!(r.is_empty());
        let b = r.get("ocrspace", None).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn registered_backend_is_returned() {
        use crate::backend::MockBackend;
        use lens_core::{Category, LineItem, Money, ReceiptDraft};

        let draft = ReceiptDraft {
            store_name: "S".into(),
            purchase_date: None,
            items: vec![LineItem::single("x", Category::Other, Money::from_cents(1))],
            total_amount: Money::from_cents(1),
        };
        let r = registry();
        let seeded = r.register(
            ProviderId::Claude,
            None,
            Backend::new(BackendKind::Mock(MockBackend::returning("mock", draft))),
        );
        assert!(Arc::ptr_eq(&seeded, &r.get("claude", None).unwrap()));
    }

    #[test]
    fn registered_backend_uses_configured_credential() {
        use crate::backend::MockBackend;

        let mut config = AnalyzerConfig::default();
        config.providers.insert(
            "ocrspace".into(),
            ProviderConfig { credential: Some("space-key".into()), ..Default::default() },
        );
        let r = BackendRegistry::new(config);
        let seeded = r.register(
            ProviderId::OcrSpace,
            None,
            Backend::new(BackendKind::Mock(MockBackend::failing("mock", "unused"))),
        );
        assert!(Arc::ptr_eq(&seeded, &r.get("ocrspace", None).unwrap()));
        assert!(Arc::ptr_eq(&seeded, &r.get("ocrspace", Some("space-key")).unwrap()));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn concurrent_lookups_share_one_instance() {
        let r = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || r.get("ocrspace", None).unwrap())
            })
            .collect();
        let backends: Vec<Arc<Backend>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(backends.iter().all(|b| Arc::ptr_eq(b, &backends[0])));
        assert!(Arc::ptr_eq(&backends[0], &r.get("ocrspace", None).unwrap()));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn provider_names_pad_in_listings() {
        assert_eq!(format!("{:<8}|", ProviderId::Grok), "grok    |");
    }
}
