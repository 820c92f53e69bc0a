use super::QuoteStore;
use crate::error::RepositoryError;
use crate::models::{NewPriceQuote, PriceQuote};
use async_trait::async_trait;
use sqlx::{PgPool, Result as SqlxResult};

/// Repository for the `price_quotes` table
pub struct PriceQuoteRepository {
    pool: PgPool,
}

impl PriceQuoteRepository {
    /// Create a new PriceQuoteRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new quote
    pub async fn create(
        &self,
        product_label: &str,
        buy_price: rust_decimal::Decimal,
        sell_price: rust_decimal::Decimal,
        unit_label: &str,
    ) -> SqlxResult<PriceQuote> {
        sqlx::query_as::<_, PriceQuote>(
            r#"
            INSERT INTO price_quotes (product_label, buy_price, sell_price, unit_label)
            VALUES ($1, $2, $3, $4)
            RETURNING id, product_label, buy_price, sell_price, unit_label, updated_at
            "#,
        )
        .bind(product_label)
        .bind(buy_price)
        .bind(sell_price)
        .bind(unit_label)
        .fetch_one(&self.pool)
        .await
    }

    /// Find a quote by id
    pub async fn find_by_id(&self, id: i64) -> SqlxResult<Option<PriceQuote>> {
        sqlx::query_as::<_, PriceQuote>(
            r#"
            SELECT id, product_label, buy_price, sell_price, unit_label, updated_at
            FROM price_quotes
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// All quotes in id order, the order the price table shows them in
    pub async fn find_all(&self) -> SqlxResult<Vec<PriceQuote>> {
        sqlx::query_as::<_, PriceQuote>(
            r#"
            SELECT id, product_label, buy_price, sell_price, unit_label, updated_at
            FROM price_quotes
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Distinct product labels, ordered by the first quote carrying each
    pub async fn distinct_labels(&self) -> SqlxResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT product_label
            FROM price_quotes
            GROUP BY product_label
            ORDER BY MIN(id) ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(label,)| label).collect())
    }

    /// Overwrite every editable field of a quote.
    /// `updated_at` is maintained by the table trigger.
    pub async fn update(
        &self,
        id: i64,
        product_label: &str,
        buy_price: rust_decimal::Decimal,
        sell_price: rust_decimal::Decimal,
        unit_label: &str,
    ) -> SqlxResult<Option<PriceQuote>> {
        sqlx::query_as::<_, PriceQuote>(
            r#"
            UPDATE price_quotes
            SET product_label = $2, buy_price = $3, sell_price = $4, unit_label = $5
            WHERE id = $1
            RETURNING id, product_label, buy_price, sell_price, unit_label, updated_at
            "#,
        )
        .bind(id)
        .bind(product_label)
        .bind(buy_price)
        .bind(sell_price)
        .bind(unit_label)
        .fetch_optional(&self.pool)
        .await
    }

    /// Delete a quote, returning whether a row was removed
    pub async fn delete(&self, id: i64) -> SqlxResult<bool> {
        let result = sqlx::query("DELETE FROM price_quotes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl QuoteStore for PriceQuoteRepository {
    async fn fetch_quotes(&self) -> Result<Vec<PriceQuote>, RepositoryError> {
        Ok(self.find_all().await?)
    }

    async fn create_quote(&self, quote: &NewPriceQuote) -> Result<PriceQuote, RepositoryError> {
        Ok(self
            .create(quote.label(), quote.buy_price, quote.sell_price, quote.unit())
            .await?)
    }

    async fn update_quote(
        &self,
        id: i64,
        quote: &NewPriceQuote,
    ) -> Result<Option<PriceQuote>, RepositoryError> {
        Ok(self
            .update(id, quote.label(), quote.buy_price, quote.sell_price, quote.unit())
            .await?)
    }

    async fn delete_quote(&self, id: i64) -> Result<bool, RepositoryError> {
        Ok(self.delete(id).await?)
    }
}
