use chrono::NaiveDate;
use lens_core::{Money, ReceiptDraft, StructuredReceipt};

use crate::error::AnalyzerError;

/// Source of "today" for receipts whose date could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Today {
    #[default]
    System,
    Fixed(NaiveDate),
}

impl Today {
    pub fn date(self) -> NaiveDate {
        match self {
            Today::System => chrono::Local::now().date_naive(),
            Today::Fixed(date) => date,
        }
    }
}

/// Consistency checks applied to every backend's output.
#[derive(Debug, Clone, Copy)]
pub struct ResponseValidator {
    tolerance: Money,
    today: Today,
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self { tolerance: Money::from_cents(10), today: Today::System }
    }
}

impl ResponseValidator {
    pub fn new(tolerance: Money) -> Self {
        Self { tolerance: tolerance.abs(), ..Self::default() }
    }

    pub fn with_today(mut self, today: Today) -> Self {
        self.today = today;
        self
    }

    /// Hard invariants fail the attempt; an item/total mismatch is only logged,
    /// since discounts and untaxed totals legitimately cause one.
    pub fn validate(&self, backend: &str, draft: ReceiptDraft) -> Result<StructuredReceipt, AnalyzerError> {
        let receipt = StructuredReceipt::validate(draft, self.today.date()).map_err(|source| {
            tracing::warn!(backend, error = %source, "receipt failed validation");
            AnalyzerError::Validation { backend: backend.to_string(), source }
        })?;

        let delta = receipt.total_delta();
        if delta > self.tolerance {
            tracing::warn!(
                backend,
                items = %receipt.items_total(),
                total = %receipt.total_amount(),
                difference = %delta,
                "total amount mismatch"
            );
        }

        tracing::debug!(backend, store = receipt.store_name(), "analysis validation passed");
        Ok(receipt)
    }
}
