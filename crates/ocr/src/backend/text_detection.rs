use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use lens_core::ReceiptDraft;
use reqwest::{multipart, Client};
use serde::{Deserialize, Serialize};

use super::vision::mime_type;
use super::{ReceiptImage, ReceiptSource};
use crate::config::ProviderConfig;
use crate::error::AnalyzerError;
use crate::extract::{ParseError, TextParser};

const GOOGLE_VISION_BASE_URL: &str = "https://vision.googleapis.com";
const OCR_SPACE_BASE_URL: &str = "https://api.ocr.space";
/// Public demo key accepted by OCR.space, heavily rate limited.
const OCR_SPACE_DEMO_KEY: &str = "helloworld";
const OCR_SPACE_ENGINE: &str = "2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextService {
    GoogleVision,
    OcrSpace,
}

impl TextService {
    pub fn provider_name(self) -> &'static str {
        match self {
            TextService::GoogleVision => "google_vision",
            TextService::OcrSpace => "ocrspace",
        }
    }
}

/// Remote OCR returning one block of text, turned into a receipt by the
/// heuristic [`TextParser`].
#[derive(Debug, Clone)]
pub struct TextDetectionBackend {
    service: TextService,
    client: Client,
    api_key: String,
    base_url: String,
    language: String,
    parser: TextParser,
}

impl TextDetectionBackend {
    pub fn google_vision(config: &ProviderConfig, timeout: Duration, parser: TextParser) -> Result<Self, AnalyzerError> {
        let api_key = config
            .credential
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AnalyzerError::Configuration("API key required for google_vision".to_string()))?;
        Self::new(TextService::GoogleVision, api_key, config, GOOGLE_VISION_BASE_URL, timeout, parser)
    }

    pub fn ocr_space(config: &ProviderConfig, timeout: Duration, parser: TextParser) -> Result<Self, AnalyzerError> {
        let api_key = config
            .credential
            .clone()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| OCR_SPACE_DEMO_KEY.to_string());
        Self::new(TextService::OcrSpace, api_key, config, OCR_SPACE_BASE_URL, timeout, parser)
    }

    fn new(
        service: TextService,
        api_key: String,
        config: &ProviderConfig,
        default_base: &str,
        timeout: Duration,
        parser: TextParser,
    ) -> Result<Self, AnalyzerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalyzerError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            service,
            client,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base.to_string())
                .trim_end_matches('/')
                .to_string(),
            language: config.language.clone().unwrap_or_else(|| "spa".to_string()),
            parser,
        })
    }

    pub fn service(&self) -> TextService {
        self.service
    }

    fn fail(&self, message: impl Into<String>) -> AnalyzerError {
        AnalyzerError::analysis(self.service.provider_name(), message)
    }

    async fn detect_text(&self, image: &ReceiptImage) -> Result<String, AnalyzerError> {
        match self.service {
            TextService::GoogleVision => self.google_vision_text(image).await,
            TextService::OcrSpace => self.ocr_space_text(image).await,
        }
    }

    async fn google_vision_text(&self, image: &ReceiptImage) -> Result<String, AnalyzerError> {
        let bytes = image.read().await?;
        let request = AnnotateRequest {
            requests: vec![AnnotateImageRequest {
                image: AnnotateImage { content: STANDARD.encode(&bytes) },
                features: vec![Feature { kind: "TEXT_DETECTION" }],
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/images:annotate", self.base_url))
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await
            .map_err(|e| self.fail(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.fail(format!("API error ({status}): {body}")));
        }

        let reply: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| self.fail(format!("Failed to parse response: {e}")))?;

        let first = reply.responses.into_iter().next().unwrap_or_default();
        if let Some(error) = first.error {
            return Err(self.fail(format!("Google Vision API error: {}", error.message)));
        }
        Ok(first
            .text_annotations
            .into_iter()
            .next()
            .map(|a| a.description)
            .unwrap_or_default())
    }

    async fn ocr_space_text(&self, image: &ReceiptImage) -> Result<String, AnalyzerError> {
        let mime = mime_type(image)?;
        let bytes = image.read().await?;
        let file_name = image
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("receipt.jpg")
            .to_string();

        let file_part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| AnalyzerError::Input(format!("Invalid MIME type: {e}")))?;

        let form = multipart::Form::new()
            .text("apikey", self.api_key.clone())
            .text("language", self.language.clone())
            .text("isOverlayRequired", "false")
            .text("detectOrientation", "true")
            .text("scale", "true")
            .text("OCREngine", OCR_SPACE_ENGINE)
            .part("file", file_part);

        let response = self
            .client
            .post(format!("{}/parse/image", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.fail(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.fail(format!("API error ({status}): {body}")));
        }

        let reply: OcrSpaceResponse = response
            .json()
            .await
            .map_err(|e| self.fail(format!("Failed to parse response: {e}")))?;

        if reply.is_errored_on_processing {
            return Err(self.fail(format!("OCR.space error: {}", error_text(&reply.error_message))));
        }
        Ok(reply
            .parsed_results
            .into_iter()
            .next()
            .map(|r| r.parsed_text)
            .unwrap_or_default())
    }
}

#[async_trait]
impl ReceiptSource for TextDetectionBackend {
    fn name(&self) -> &str {
        self.service.provider_name()
    }

    async fn read_receipt(&self, image: &ReceiptImage) -> Result<ReceiptDraft, AnalyzerError> {
        let text = self.detect_text(image).await?;
        if text.trim().is_empty() {
            return Err(self.fail("No text detected in image"));
        }
        tracing::debug!(backend = self.name(), chars = text.len(), "text detected");

        self.parser.parse(&text).map_err(|e: ParseError| self.fail(e.to_string()))
    }
}

/// OCR.space reports errors as either a string or a list of strings.
fn error_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join("; "),
        serde_json::Value::Null => "unknown error".to_string(),
        other => other.to_string(),
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AnnotateRequest {
    requests: Vec<AnnotateImageRequest>,
}

#[derive(Debug, Serialize)]
struct AnnotateImageRequest {
    image: AnnotateImage,
    features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
struct AnnotateImage {
    content: String,
}

#[derive(Debug, Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    #[serde(default)]
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrSpaceResponse {
    #[serde(default)]
    parsed_results: Vec<ParsedResult>,
    #[serde(default)]
    is_errored_on_processing: bool,
    #[serde(default)]
    error_message: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    #[serde(default)]
    parsed_text: String,
}
