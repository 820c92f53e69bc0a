//! Domain models for the price board backend.
//!
//! Database-backed rows for the quote and history tables, the admin form
//! payload, the change-feed event type and the history range selector.

pub mod change_event;
pub mod history_range;
pub mod price_history;
pub mod price_quote;

// Re-export all models for convenient access
pub use change_event::{ChangeEvent, ChangeKind, ChangePayload, OldRecord};
pub use history_range::HistoryRange;
pub use price_history::PriceHistoryEntry;
pub use price_quote::{NewPriceQuote, PriceQuote, DEFAULT_UNIT_LABEL};
