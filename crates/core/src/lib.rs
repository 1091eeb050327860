pub mod money;
pub mod receipt;

pub use money::Money;
pub use receipt::{Category, LineItem, ReceiptDraft, StructuredReceipt, ValidationError, UNNAMED_ITEM};
