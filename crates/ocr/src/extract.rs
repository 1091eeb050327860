use std::sync::{Arc, OnceLock};

use chrono::NaiveDate;
use lens_core::{Category, LineItem, Money, ReceiptDraft};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::locale::Locale;
use crate::validate::Today;

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_decimal, r"\d+[.,]\d{2}");
re!(re_date, r"\b\d{1,2}[/-]\d{1,2}[/-](?:\d{4}|\d{2})\b");
re!(re_item_line, r"^(.*?)(\d+[.,]\d{2})\s*€?\s*$");
re!(re_leading_quantity, r"^(\d+)\s+");

/// How to behave when text yields no usable total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Emit a 0.01 placeholder item so the receipt can be corrected later.
    #[default]
    Lenient,
    /// Fail the attempt instead.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no total amount found in recognized text")]
    NoTotal,
    #[error("could not extract any items from recognized text")]
    NoItems,
}

/// One recognized line with the engine's confidence (0.0–1.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedLine {
    pub text: String,
    pub confidence: f32,
}

impl RecognizedLine {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self { text: text.into(), confidence: confidence.clamp(0.0, 1.0) }
    }
}

/// Splits a text block into trimmed, non-empty lines.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

// ── Plain text parser (remote text-detection backends) ───────────────────────

/// Heuristic parser for a flat block of OCR text with no item separation.
#[derive(Debug, Clone)]
pub struct TextParser {
    locale: Arc<Locale>,
    mode: ParseMode,
    today: Today,
}

impl TextParser {
    pub fn new(locale: Arc<Locale>, mode: ParseMode) -> Self {
        Self { locale, mode, today: Today::System }
    }

    pub fn with_today(mut self, today: Today) -> Self {
        self.today = today;
        self
    }

    pub fn parse(&self, text: &str) -> Result<ReceiptDraft, ParseError> {
        let lines = split_lines(text);
        let store_name = self.store_name(&lines);
        let purchase_date = self.purchase_date(&lines);

        let (items, total_amount) = match self.total(&lines) {
            Some(total) if total.is_positive() => (
                vec![LineItem::single(self.locale.catch_all_item.clone(), Category::Other, total)],
                total,
            ),
            _ if self.mode == ParseMode::Strict => return Err(ParseError::NoTotal),
            _ => {
                tracing::warn!(store = %store_name, "no total found in text, emitting placeholder item");
                let placeholder = Money::from_cents(1);
                (
                    vec![LineItem::single(
                        self.locale.placeholder_item.clone(),
                        Category::Other,
                        placeholder,
                    )],
                    placeholder,
                )
            }
        };

        Ok(ReceiptDraft {
            store_name,
            purchase_date: Some(purchase_date),
            items,
            total_amount,
        })
    }

    pub fn store_name(&self, lines: &[&str]) -> String {
        lines
            .first()
            .map(|l| l.to_string())
            .unwrap_or_else(|| self.locale.unknown_store.clone())
    }

    pub fn total(&self, lines: &[&str]) -> Option<Money> {
        find_total(&self.locale, lines.iter().copied())
    }

    pub fn purchase_date(&self, lines: &[&str]) -> NaiveDate {
        find_date(&self.locale, lines.iter().copied()).unwrap_or_else(|| self.today.date())
    }
}

// ── Confidence-aware parser (local OCR) ───────────────────────────────────────

/// Parser for per-line OCR output that attempts genuine item separation.
#[derive(Debug, Clone)]
pub struct LineParser {
    locale: Arc<Locale>,
    store_confidence: f32,
    item_confidence: f32,
    today: Today,
}

impl LineParser {
    pub fn new(locale: Arc<Locale>, store_confidence: f32, item_confidence: f32) -> Self {
        Self { locale, store_confidence, item_confidence, today: Today::System }
    }

    pub fn with_today(mut self, today: Today) -> Self {
        self.today = today;
        self
    }

    pub fn parse(&self, lines: &[RecognizedLine]) -> Result<ReceiptDraft, ParseError> {
        let lines: Vec<RecognizedLine> = lines
            .iter()
            .map(|l| RecognizedLine { text: l.text.trim().to_string(), confidence: l.confidence })
            .filter(|l| !l.text.is_empty())
            .collect();

        let store_name = self.store_name(&lines);
        let purchase_date = find_date(&self.locale, lines.iter().map(|l| l.text.as_str()))
            .unwrap_or_else(|| self.today.date());
        let mut items = self.items(&lines);
        let stated_total = find_total(&self.locale, lines.iter().map(|l| l.text.as_str()));

        let total_amount = match (stated_total, items.is_empty()) {
            (Some(total), _) if total.is_positive() => total,
            (_, false) => {
                let total: Money = items.iter().map(|i| i.total_price).sum();
                tracing::info!(total = %total, "no total line, using the sum of items");
                total
            }
            _ => return Err(ParseError::NoItems),
        };

        if items.is_empty() {
            items.push(LineItem::single(self.locale.generic_item.clone(), Category::Other, total_amount));
        }

        tracing::info!(store = %store_name, items = items.len(), total = %total_amount, "parsed local OCR lines");
        Ok(ReceiptDraft {
            store_name,
            purchase_date: Some(purchase_date),
            items,
            total_amount,
        })
    }

    /// First of the opening three lines that the engine is confident about.
    pub fn store_name(&self, lines: &[RecognizedLine]) -> String {
        lines
            .iter()
            .take(3)
            .find(|l| l.confidence > self.store_confidence && l.text.chars().count() > 3)
            .map(|l| title_case(&l.text))
            .unwrap_or_else(|| self.locale.unknown_store.clone())
    }

    pub fn items(&self, lines: &[RecognizedLine]) -> Vec<LineItem> {
        lines
            .iter()
            .filter(|l| l.confidence > self.item_confidence)
            .filter(|l| !self.locale.is_header_line(&l.text))
            .filter_map(|l| self.parse_item(&l.text))
            .collect()
    }

    fn parse_item(&self, text: &str) -> Option<LineItem> {
        let caps = re_item_line().captures(text)?;
        let total_price = parse_decimal(caps.get(2)?.as_str())?;
        let description = caps.get(1)?.as_str().trim();

        if description.chars().count() < 3 || description.chars().all(|c| c.is_ascii_digit() || c.is_whitespace()) {
            return None;
        }

        let description = description.split_whitespace().collect::<Vec<_>>().join(" ");
        let (quantity, name) = match re_leading_quantity().captures(&description) {
            Some(q) => {
                let quantity = Decimal::from_str(q.get(1)?.as_str()).ok()?;
                (quantity, description[q.get(0)?.end()..].trim().to_string())
            }
            None => (Decimal::ONE, description.clone()),
        };
        if name.is_empty() || quantity <= Decimal::ZERO {
            return None;
        }

        let name = title_case(&name);
        Some(LineItem {
            category: self.locale.classify_product(&name),
            product_name: name,
            quantity,
            unit_price: Some(total_price.per_unit(quantity)),
            total_price,
        })
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────────

/// Last decimal-shaped number on the first marker line that has one.
fn find_total<'a>(locale: &Locale, lines: impl Iterator<Item = &'a str>) -> Option<Money> {
    lines
        .filter(|line| locale.is_total_line(line))
        .find_map(|line| {
            let last = re_decimal().find_iter(line).last()?;
            let amount = parse_decimal(last.as_str());
            if amount.is_some() {
                tracing::debug!(line, "found total");
            }
            amount
        })
}

fn find_date<'a>(locale: &Locale, lines: impl Iterator<Item = &'a str>) -> Option<NaiveDate> {
    lines
        .flat_map(|line| re_date().find_iter(line))
        .find_map(|m| parse_date_token(m.as_str(), &locale.date_formats))
}

/// Tries each format in order. Four-digit years only go through `%Y`
/// formats and two-digit years only through `%y`.
fn parse_date_token(token: &str, formats: &[String]) -> Option<NaiveDate> {
    let year_len = token.rsplit(|c| c == '/' || c == '-').next()?.len();
    formats
        .iter()
        .filter(|f| match year_len {
            4 => f.contains("%Y"),
            2 => f.contains("%y"),
            _ => false,
        })
        .find_map(|f| NaiveDate::parse_from_str(token, f).ok())
}

fn parse_decimal(s: &str) -> Option<Money> {
    Decimal::from_str(&s.replace(',', ".")).ok().map(Money::from_decimal)
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
