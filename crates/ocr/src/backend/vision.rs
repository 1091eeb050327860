use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::NaiveDate;
use lens_core::{Category, LineItem, Money, ReceiptDraft};
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ReceiptImage, ReceiptSource};
use crate::config::ProviderConfig;
use crate::error::AnalyzerError;
use crate::locale::Locale;

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const XAI_BASE_URL: &str = "https://api.x.ai/v1";
const DEFAULT_MAX_TOKENS: u32 = 2048;

/// The generative model is told to use this when the date is illegible.
const UNREADABLE_DATE: &str = "0000-00-00";

fn instruction() -> String {
    let categories: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
    format!(
        "Analyze this receipt image and extract its contents.\n\
         Respond with ONLY a JSON object, no explanations, in exactly this shape:\n\
         {{\"store_name\": \"string\", \"purchase_date\": \"YYYY-MM-DD\", \
         \"items\": [{{\"product_name\": \"string\", \"category\": \"string\", \
         \"quantity\": 1.0, \"unit_price\": 0.00, \"total_price\": 0.00}}], \
         \"total_amount\": 0.00}}\n\
         Rules:\n\
         - category must be one of: {}\n\
         - amounts are plain numbers with a dot as decimal separator\n\
         - if the date cannot be read use \"{UNREADABLE_DATE}\"\n\
         - include every purchased line; skip taxes, payment and change lines",
        categories.join(", ")
    )
}

/// Wire format spoken by the vision endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionDialect {
    /// Anthropic Messages API.
    Anthropic,
    /// `/chat/completions` with `image_url` content parts.
    OpenAiCompatible,
}

/// Generative vision model asked to return the receipt as strict JSON.
#[derive(Debug, Clone)]
pub struct VisionBackend {
    name: String,
    dialect: VisionDialect,
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    locale: Arc<Locale>,
}

impl VisionBackend {
    pub fn claude(config: &ProviderConfig, timeout: Duration, locale: Arc<Locale>) -> Result<Self, AnalyzerError> {
        Self::new(
            "claude",
            VisionDialect::Anthropic,
            config,
            (ANTHROPIC_BASE_URL, "claude-sonnet-4-20250514"),
            timeout,
            locale,
        )
    }

    pub fn openai(config: &ProviderConfig, timeout: Duration, locale: Arc<Locale>) -> Result<Self, AnalyzerError> {
        Self::new(
            "openai",
            VisionDialect::OpenAiCompatible,
            config,
            (OPENAI_BASE_URL, "gpt-4o"),
            timeout,
            locale,
        )
    }

    pub fn grok(config: &ProviderConfig, timeout: Duration, locale: Arc<Locale>) -> Result<Self, AnalyzerError> {
        Self::new(
            "grok",
            VisionDialect::OpenAiCompatible,
            config,
            (XAI_BASE_URL, "grok-2-vision-1212"),
            timeout,
            locale,
        )
    }

    fn new(
        name: &str,
        dialect: VisionDialect,
        config: &ProviderConfig,
        (default_base, default_model): (&str, &str),
        timeout: Duration,
        locale: Arc<Locale>,
    ) -> Result<Self, AnalyzerError> {
        let api_key = config
            .credential
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AnalyzerError::Configuration(format!("API key required for {name}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalyzerError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            dialect,
            client,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone().unwrap_or_else(|| default_model.to_string()),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            locale,
        })
    }

    pub fn dialect(&self) -> VisionDialect {
        self.dialect
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn ask(&self, mime: &str, encoded: String) -> Result<String, AnalyzerError> {
        let request = match self.dialect {
            VisionDialect::Anthropic => self
                .client
                .post(format!("{}/v1/messages", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&MessagesRequest {
                    model: &self.model,
                    max_tokens: self.max_tokens,
                    messages: vec![Message {
                        role: "user",
                        content: vec![
                            MessagePart::Image {
                                source: ImageSource { kind: "base64", media_type: mime, data: encoded },
                            },
                            MessagePart::Text { text: instruction() },
                        ],
                    }],
                }),
            VisionDialect::OpenAiCompatible => self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&ChatRequest {
                    model: &self.model,
                    max_tokens: self.max_tokens,
                    messages: vec![ChatMessage {
                        role: "user",
                        content: vec![
                            ContentPart::ImageUrl {
                                image_url: ImageUrl {
                                    url: format!("data:{mime};base64,{encoded}"),
                                    detail: "high",
                                },
                            },
                            ContentPart::Text { text: instruction() },
                        ],
                    }],
                }),
        };

        let response = request
            .send()
            .await
            .map_err(|e| AnalyzerError::analysis(&self.name, format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::analysis(
                &self.name,
                format!("API error ({status}): {}", preview(&body)),
            ));
        }

        let text = match self.dialect {
            VisionDialect::Anthropic => {
                let reply: MessagesResponse = response.json().await.map_err(|e| {
                    AnalyzerError::analysis(&self.name, format!("Failed to parse response: {e}"))
                })?;
                reply
                    .content
                    .into_iter()
                    .filter_map(|block| block.text)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            VisionDialect::OpenAiCompatible => {
                let reply: ChatResponse = response.json().await.map_err(|e| {
                    AnalyzerError::analysis(&self.name, format!("Failed to parse response: {e}"))
                })?;
                reply
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default()
            }
        };

        tracing::debug!(backend = %self.name, response = %preview(&text), "vision model replied");
        Ok(text)
    }

    /// Turns the model's reply into a draft. Prose around the JSON is ignored.
    pub fn parse_reply(&self, text: &str) -> Result<ReceiptDraft, AnalyzerError> {
        let json = first_json_object(text)
            .ok_or_else(|| AnalyzerError::analysis(&self.name, "No JSON object found in response"))?;
        let wire: WireReceipt = serde_json::from_str(json)
            .map_err(|e| AnalyzerError::analysis(&self.name, format!("Invalid JSON in response: {e}")))?;
        wire.into_draft(&self.locale)
            .map_err(|field| AnalyzerError::analysis(&self.name, format!("Unusable value for {field}")))
    }
}

#[async_trait]
impl ReceiptSource for VisionBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_receipt(&self, image: &ReceiptImage) -> Result<ReceiptDraft, AnalyzerError> {
        let mime = mime_type(image)?;
        let bytes = image.read().await?;
        let text = self.ask(mime, STANDARD.encode(&bytes)).await?;
        self.parse_reply(&text)
    }
}

pub fn mime_type(image: &ReceiptImage) -> Result<&'static str, AnalyzerError> {
    match image.extension().as_deref() {
        Some("jpg") | Some("jpeg") => Ok("image/jpeg"),
        Some("png") => Ok("image/png"),
        Some("webp") => Ok("image/webp"),
        Some("gif") => Ok("image/gif"),
        other => Err(AnalyzerError::Input(format!(
            "Unsupported image format: {}",
            other.unwrap_or("(none)")
        ))),
    }
}

/// First balanced `{ ... }` span, skipping braces inside JSON strings.
pub fn first_json_object(text: &str) -> Option<&str> {
    text.char_indices()
        .filter(|(_, c)| *c == '{')
        .find_map(|(start, _)| balanced_from(text, start))
}

fn balanced_from(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

// ── Request / response wire types ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<MessagePart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum MessagePart<'a> {
    #[serde(rename = "image")]
    Image { source: ImageSource<'a> },
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    media_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart<'a> {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: String,
    detail: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

// ── Receipt JSON returned by the model ───────────────────────────────────────

/// Models sometimes quote amounts or use a decimal comma.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireNumber {
    Number(f64),
    Text(String),
}

impl WireNumber {
    fn decimal(&self) -> Option<Decimal> {
        match self {
            WireNumber::Number(n) => Decimal::from_f64(*n),
            WireNumber::Text(s) => {
                let cleaned: String = s
                    .chars()
                    .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
                    .collect();
                Decimal::from_str(&cleaned.replace(',', ".")).ok()
            }
        }
    }

    fn money(&self) -> Option<Money> {
        self.decimal().map(Money::from_decimal)
    }
}

#[derive(Debug, Deserialize)]
struct WireReceipt {
    store_name: String,
    #[serde(default)]
    purchase_date: Option<String>,
    items: Vec<WireItem>,
    total_amount: WireNumber,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    quantity: Option<WireNumber>,
    #[serde(default)]
    unit_price: Option<WireNumber>,
    total_price: WireNumber,
}

impl WireReceipt {
    /// `Err` names the field whose value could not be used.
    fn into_draft(self, locale: &Locale) -> Result<ReceiptDraft, &'static str> {
        let total_amount = self.total_amount.money().ok_or("total_amount")?;
        let items = self
            .items
            .into_iter()
            .map(|item| {
                let category = match item.category.as_deref() {
                    Some(label) => locale.normalize_category(label),
                    None => locale.classify_product(&item.product_name),
                };
                Ok(LineItem {
                    category,
                    quantity: item.quantity.and_then(|q| q.decimal()).unwrap_or(Decimal::ONE),
                    unit_price: item.unit_price.and_then(|p| p.money()),
                    total_price: item.total_price.money().ok_or("total_price")?,
                    product_name: item.product_name,
                })
            })
            .collect::<Result<Vec<_>, &'static str>>()?;

        let purchase_date = self
            .purchase_date
            .as_deref()
            .filter(|d| *d != UNREADABLE_DATE)
            .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok());

        Ok(ReceiptDraft {
            store_name: self.store_name,
            purchase_date,
            items,
            total_amount,
        })
    }
}
