use super::HistoryStore;
use crate::error::RepositoryError;
use crate::models::PriceHistoryEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Result as SqlxResult};

/// Repository for the append-only `price_history` table
pub struct PriceHistoryRepository {
    pool: PgPool,
}

impl PriceHistoryRepository {
    /// Create a new PriceHistoryRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// History of one product since `since` (inclusive).
    ///
    /// Ordered by id rather than timestamp so entries sharing a timestamp
    /// keep a stable order.
    pub async fn find_by_label_since(
        &self,
        product_label: &str,
        since: DateTime<Utc>,
    ) -> SqlxResult<Vec<PriceHistoryEntry>> {
        sqlx::query_as::<_, PriceHistoryEntry>(
            r#"
            SELECT id, product_label, buy_price, sell_price, changed_at
            FROM price_history
            WHERE product_label = $1 AND changed_at >= $2
            ORDER BY id ASC
            "#,
        )
        .bind(product_label)
        .bind(since)
        .fetch_all(&self.pool)
        .await
    }

    /// Number of entries recorded for a product
    pub async fn count_by_label(&self, product_label: &str) -> SqlxResult<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM price_history WHERE product_label = $1",
        )
        .bind(product_label)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }
}

#[async_trait]
impl HistoryStore for PriceHistoryRepository {
    async fn fetch_history(
        &self,
        product_label: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceHistoryEntry>, RepositoryError> {
        Ok(self.find_by_label_since(product_label, since).await?)
    }
}
