//! Rows and chart points as display clients render them.

use crate::models::{PriceHistoryEntry, PriceQuote};
use crate::time_ago::format_elapsed;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Rows edited within this many seconds are highlighted
pub const RECENT_WINDOW_SECS: i64 = 5;

/// One line of the price table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRow {
    pub id: i64,
    pub product_label: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub buy_display: String,
    pub sell_display: String,
    pub unit_label: String,
    pub updated_at: DateTime<Utc>,
    pub elapsed_label: String,
    pub recently_updated: bool,
}

impl QuoteRow {
    pub fn render(quote: &PriceQuote, now: DateTime<Utc>) -> Self {
        Self {
            id: quote.id,
            product_label: quote.product_label.clone(),
            buy_price: quote.buy_price,
            sell_price: quote.sell_price,
            buy_display: format_vnd(quote.buy_price),
            sell_display: format_vnd(quote.sell_price),
            unit_label: quote.unit_label.clone(),
            updated_at: quote.updated_at,
            elapsed_label: format_elapsed(quote.updated_at, now),
            recently_updated: quote.updated_at > now - Duration::seconds(RECENT_WINDOW_SECS),
        }
    }
}

/// Render the whole table, keeping list order
pub fn render_rows(quotes: &[PriceQuote], now: DateTime<Utc>) -> Vec<QuoteRow> {
    quotes.iter().map(|quote| QuoteRow::render(quote, now)).collect()
}

/// Rows for the admin editor, most recently edited first
pub fn admin_rows(quotes: &[PriceQuote], now: DateTime<Utc>) -> Vec<QuoteRow> {
    let mut rows = render_rows(quotes, now);
    rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
    rows
}

/// One point of the history chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub changed_at: DateTime<Utc>,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
}

impl From<&PriceHistoryEntry> for ChartPoint {
    fn from(entry: &PriceHistoryEntry) -> Self {
        Self {
            changed_at: entry.changed_at,
            buy_price: entry.buy_price,
            sell_price: entry.sell_price,
        }
    }
}

pub fn chart_points(entries: &[PriceHistoryEntry]) -> Vec<ChartPoint> {
    entries.iter().map(ChartPoint::from).collect()
}

/// vi-VN number formatting: `.` groups thousands, `,` marks decimals,
/// at most three fraction digits.
pub fn format_vnd(amount: Decimal) -> String {
    let rounded = amount
        .round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero)
        .normalize();
    let digits = rounded.abs().to_string();
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (digits.as_str(), None),
    };

    let mut out = String::with_capacity(digits.len() + int_part.len() / 3 + 1);
    if rounded.is_sign_negative() && !rounded.is_zero() {
        out.push('-');
    }
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    if let Some(frac_part) = frac_part {
        out.push(',');
        out.push_str(frac_part);
    }
    out
}
