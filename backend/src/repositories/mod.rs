//! Data access for the quote and history tables.
//!
//! The services talk to the store through [`QuoteStore`] and
//! [`HistoryStore`] so they can run against an in-memory store in tests.

pub mod price_history_repository;
pub mod price_quote_repository;

// Re-export all repositories for convenient access
pub use price_history_repository::PriceHistoryRepository;
pub use price_quote_repository::PriceQuoteRepository;

use crate::error::RepositoryError;
use crate::models::{NewPriceQuote, PriceHistoryEntry, PriceQuote};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read/write access to current quotes
#[async_trait]
pub trait QuoteStore: Send + Sync {
    /// Every quote, ordered by id
    async fn fetch_quotes(&self) -> Result<Vec<PriceQuote>, RepositoryError>;

    async fn create_quote(&self, quote: &NewPriceQuote) -> Result<PriceQuote, RepositoryError>;

    /// `None` when no row has this id
    async fn update_quote(
        &self,
        id: i64,
        quote: &NewPriceQuote,
    ) -> Result<Option<PriceQuote>, RepositoryError>;

    /// `false` when no row has this id
    async fn delete_quote(&self, id: i64) -> Result<bool, RepositoryError>;
}

/// Read access to the price history table
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Entries for `product_label` with `changed_at >= since`, ordered by id
    async fn fetch_history(
        &self,
        product_label: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceHistoryEntry>, RepositoryError>;
}
