use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Immutable snapshot of a product's prices, one row of `price_history`.
/// Rows are appended by the `price_quotes` trigger, never by this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PriceHistoryEntry {
    pub id: i64,
    pub product_label: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub changed_at: DateTime<Utc>,
}
