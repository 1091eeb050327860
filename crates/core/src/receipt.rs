use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::money::Money;

pub const UNNAMED_ITEM: &str = "Unnamed item";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Beverages,
    Meat,
    Produce,
    Dairy,
    Bakery,
    Cleaning,
    Leisure,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Beverages,
        Category::Meat,
        Category::Produce,
        Category::Dairy,
        Category::Bakery,
        Category::Cleaning,
        Category::Leisure,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Beverages => "beverages",
            Category::Meat => "meat",
            Category::Produce => "produce",
            Category::Dairy => "dairy",
            Category::Bakery => "bakery",
            Category::Cleaning => "cleaning",
            Category::Leisure => "leisure",
            Category::Other => "other",
        }
    }

    /// Maps a canonical label onto the enumeration. Anything unrecognised is `Other`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == label)
            .unwrap_or(Category::Other)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_name: String,
    pub category: Category,
    pub quantity: Decimal,
    pub unit_price: Option<Money>,
    pub total_price: Money,
}

impl LineItem {
    /// A single unit priced at `total_price`.
    pub fn single(product_name: impl Into<String>, category: Category, total_price: Money) -> Self {
        LineItem {
            product_name: product_name.into(),
            category,
            quantity: Decimal::ONE,
            unit_price: Some(total_price),
            total_price,
        }
    }

    fn normalized(mut self) -> Self {
        let name = self.product_name.trim();
        self.product_name = if name.is_empty() {
            UNNAMED_ITEM.to_string()
        } else {
            name.to_string()
        };
        if self.quantity <= Decimal::ZERO {
            self.quantity = Decimal::ONE;
        }
        self
    }
}

/// What a recognition backend hands back before any invariant has been checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptDraft {
    pub store_name: String,
    /// `None` when the backend could not read a usable date.
    pub purchase_date: Option<NaiveDate>,
    pub items: Vec<LineItem>,
    pub total_amount: Money,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Store name is required")]
    EmptyStoreName,
    #[error("At least one item is required")]
    NoItems,
    #[error("Total amount must be positive, got {0}")]
    NonPositiveTotal(Money),
}

/// A receipt whose required invariants hold. Only obtainable through
/// [`StructuredReceipt::validate`], and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredReceipt {
    store_name: String,
    purchase_date: NaiveDate,
    items: Vec<LineItem>,
    total_amount: Money,
}

impl StructuredReceipt {
    /// Checks the hard invariants and resolves a missing date to `today`.
    pub fn validate(draft: ReceiptDraft, today: NaiveDate) -> Result<Self, ValidationError> {
        let store_name = draft.store_name.trim();
        if store_name.is_empty() {
            return Err(ValidationError::EmptyStoreName);
        }
        if draft.items.is_empty() {
            return Err(ValidationError::NoItems);
        }
        if !draft.total_amount.is_positive() {
            return Err(ValidationError::NonPositiveTotal(draft.total_amount));
        }

        Ok(StructuredReceipt {
            store_name: store_name.to_string(),
            purchase_date: draft.purchase_date.unwrap_or(today),
            items: draft.items.into_iter().map(LineItem::normalized).collect(),
            total_amount: draft.total_amount,
        })
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn purchase_date(&self) -> NaiveDate {
        self.purchase_date
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn items_total(&self) -> Money {
        self.items.iter().map(|i| i.total_price).sum()
    }

    /// Absolute difference between the itemised sum and the stated total.
    pub fn total_delta(&self) -> Money {
        (self.items_total() - self.total_amount).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn draft(items: Vec<LineItem>, total_cents: i64) -> ReceiptDraft {
        ReceiptDraft {
            store_name: "Mercadona".into(),
            purchase_date: NaiveDate::from_ymd_opt(2024, 1, 15),
            items,
            total_amount: Money::from_cents(total_cents),
        }
    }

    fn item(name: &str, cents: i64) -> LineItem {
        LineItem::single(name, Category::Other, Money::from_cents(cents))
    }

    #[test]
    fn category_from_label_is_case_insensitive() {
        assert_eq!(Category::from_label("Dairy"), Category::Dairy);
        assert_eq!(Category::from_label(" beverages "), Category::Beverages);
        assert_eq!(Category::from_label("electronics"), Category::Other);
        assert_eq!(Category::from_label(""), Category::Other);
    }

    #[test]
    fn category_serializes_lowercase() {
        let json = serde_json::to_string(&Category::Bakery).unwrap();
        assert_eq!(json, "\"bakery\"");
    }

    #[test]
    fn validate_accepts_consistent_receipt() {
        let r = StructuredReceipt::validate(draft(vec![item("Pan", 120), item("Leche", 95)], 215), today())
            .unwrap();
        assert_eq!(r.store_name(), "Mercadona");
        assert_eq!(r.items().len(), 2);
        assert_eq!(r.total_delta(), Money::zero());
    }

    #[test]
    fn validate_tolerates_mismatch_in_either_direction() {
        assert!(StructuredReceipt::validate(draft(vec![item("A", 1000)], 1010), today()).is_ok());
        assert!(StructuredReceipt::validate(draft(vec![item("A", 1010)], 1000), today()).is_ok());
        // Large gaps are also not fatal; discounts and taxes cause them.
        assert!(StructuredReceipt::validate(draft(vec![item("A", 500)], 1000), today()).is_ok());
    }

    #[test]
    fn validate_rejects_empty_items() {
        let err = StructuredReceipt::validate(draft(vec![], 100), today()).unwrap_err();
        assert_eq!(err, ValidationError::NoItems);
    }

    #[test]
    fn validate_rejects_non_positive_total() {
        let err = StructuredReceipt::validate(draft(vec![item("A", 0)], 0), today()).unwrap_err();
        assert_eq!(err, ValidationError::NonPositiveTotal(Money::zero()));
        let err = StructuredReceipt::validate(draft(vec![item("A", 100)], -100), today()).unwrap_err();
        assert!(matches!(err, ValidationError::NonPositiveTotal(_)));
    }

    #[test]
    fn validate_rejects_blank_store() {
        let mut d = draft(vec![item("A", 100)], 100);
        d.store_name = "   ".into();
        assert_eq!(StructuredReceipt::validate(d, today()).unwrap_err(), ValidationError::EmptyStoreName);
    }

    #[test]
    fn missing_date_falls_back_to_today() {
        let mut d = draft(vec![item("A", 100)], 100);
        d.purchase_date = None;
        let r = StructuredReceipt::validate(d, today()).unwrap();
        assert_eq!(r.purchase_date(), today());
    }

    #[test]
    fn items_are_normalized() {
        let mut odd = item("  ", 100);
        odd.quantity = Decimal::ZERO;
        let r = StructuredReceipt::validate(draft(vec![odd], 100), today()).unwrap();
        assert_eq!(r.items()[0].product_name, UNNAMED_ITEM);
        assert_eq!(r.items()[0].quantity, Decimal::ONE);
    }
}
