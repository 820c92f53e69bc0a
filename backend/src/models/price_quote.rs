use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Unit shown next to prices when the admin leaves it blank
pub const DEFAULT_UNIT_LABEL: &str = "VNĐ/chỉ";

/// Current buy/sell price of one product, one row of `price_quotes`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PriceQuote {
    pub id: i64,
    pub product_label: String,
    pub buy_price: Decimal,  // NUMERIC(18, 2) in database
    pub sell_price: Decimal, // NUMERIC(18, 2) in database
    pub unit_label: String,
    pub updated_at: DateTime<Utc>,
}

/// Admin form payload for creating or editing a quote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPriceQuote {
    pub product_label: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    #[serde(default)]
    pub unit_label: Option<String>,
}

impl NewPriceQuote {
    pub fn new(product_label: impl Into<String>, buy_price: Decimal, sell_price: Decimal) -> Self {
        Self {
            product_label: product_label.into(),
            buy_price,
            sell_price,
            unit_label: None,
        }
    }

    pub fn with_unit(mut self, unit_label: impl Into<String>) -> Self {
        self.unit_label = Some(unit_label.into());
        self
    }

    /// Validate the form fields
    pub fn validate(&self) -> Result<(), String> {
        if self.product_label.trim().is_empty() {
            return Err("Product label must not be empty".to_string());
        }
        if self.buy_price < Decimal::ZERO {
            return Err("Buy price must not be negative".to_string());
        }
        if self.sell_price < Decimal::ZERO {
            return Err("Sell price must not be negative".to_string());
        }
        Ok(())
    }

    /// Trimmed label as stored
    pub fn label(&self) -> &str {
        self.product_label.trim()
    }

    /// Unit label as stored, falling back to [`DEFAULT_UNIT_LABEL`]
    pub fn unit(&self) -> &str {
        match self.unit_label.as_deref().map(str::trim) {
            Some(unit) if !unit.is_empty() => unit,
            _ => DEFAULT_UNIT_LABEL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_blank_label() {
        let form = NewPriceQuote::new("   ", Decimal::new(100, 0), Decimal::new(110, 0));
        assert!(form.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_prices() {
        let form = NewPriceQuote::new("Nhẫn tròn 9999", Decimal::new(-1, 0), Decimal::new(110, 0));
        assert!(form.validate().is_err());

        let form = NewPriceQuote::new("Nhẫn tròn 9999", Decimal::new(1, 0), Decimal::new(-110, 0));
        assert!(form.validate().is_err());
    }

    #[test]
    fn test_unit_defaults_when_blank() {
        let form = NewPriceQuote::new(" SJC ", Decimal::ZERO, Decimal::ZERO);
        assert_eq!(form.unit(), DEFAULT_UNIT_LABEL);
        assert_eq!(form.label(), "SJC");
        assert!(form.validate().is_ok());

        let form = form.with_unit("  ");
        assert_eq!(form.unit(), DEFAULT_UNIT_LABEL);

        let form = NewPriceQuote::new("SJC", Decimal::ZERO, Decimal::ZERO).with_unit("VNĐ/lượng");
        assert_eq!(form.unit(), "VNĐ/lượng");
    }

    #[test]
    fn test_form_deserializes_without_unit() {
        let form: NewPriceQuote = serde_json::from_str(
            r#"{"product_label":"SJC","buy_price":"8350000","sell_price":"8550000"}"#,
        )
        .unwrap();
        assert_eq!(form.unit_label, None);
        assert_eq!(form.buy_price, Decimal::new(8_350_000, 0));
    }
}
