use crate::error::{option_to_result, AppError, AppResult};
use crate::models::{NewPriceQuote, PriceQuote};
use crate::repositories::QuoteStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Admin CRUD on the quote table.
///
/// Writes go straight to the store; the display side picks them up from
/// the change feed like any other change.
pub struct AdminService<S: QuoteStore + ?Sized> {
    store: Arc<S>,
}

impl<S: QuoteStore + ?Sized> AdminService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Add a new product to the price table
    pub async fn create_quote(&self, form: &NewPriceQuote) -> AppResult<PriceQuote> {
        form.validate().map_err(AppError::Validation)?;

        let quote = self.store.create_quote(form).await?;
        info!(
            "Created quote {} ({}): buy={} sell={}",
            quote.id, quote.product_label, quote.buy_price, quote.sell_price
        );
        Ok(quote)
    }

    /// Overwrite a product's label, prices and unit
    pub async fn update_quote(&self, id: i64, form: &NewPriceQuote) -> AppResult<PriceQuote> {
        form.validate().map_err(AppError::Validation)?;

        let updated = self.store.update_quote(id, form).await?;
        let quote = option_to_result(updated, &format!("Price quote {}", id))?;
        info!(
            "Updated quote {} ({}): buy={} sell={}",
            quote.id, quote.product_label, quote.buy_price, quote.sell_price
        );
        Ok(quote)
    }

    /// Remove a product. Nothing is sent to the store unless `confirmed`;
    /// there is no undo.
    pub async fn delete_quote(&self, id: i64, confirmed: bool) -> AppResult<()> {
        if !confirmed {
            warn!("Refusing unconfirmed delete of quote {}", id);
            return Err(AppError::Validation(format!(
                "Deleting price quote {} requires confirmation",
                id
            )));
        }

        if !self.store.delete_quote(id).await? {
            return Err(AppError::NotFound(format!("Price quote {}", id)));
        }
        info!("Deleted quote {}", id);
        Ok(())
    }
}
