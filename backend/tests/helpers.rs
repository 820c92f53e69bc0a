#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use congngoc_backend::change_feed::FeedItem;
use congngoc_backend::error::RepositoryError;
use congngoc_backend::models::*;
use congngoc_backend::repositories::*;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Repositories over a `#[sqlx::test]` pool
pub struct TestDatabase {
    pub pool: PgPool,
    pub quote_repo: Arc<PriceQuoteRepository>,
    pub history_repo: Arc<PriceHistoryRepository>,
}

impl TestDatabase {
    /// Create TestDatabase from an existing pool (useful with sqlx::test)
    pub async fn from_pool(pool: PgPool) -> Self {
        Self {
            pool: pool.clone(),
            quote_repo: Arc::new(PriceQuoteRepository::new(pool.clone())),
            history_repo: Arc::new(PriceHistoryRepository::new(pool)),
        }
    }

    /// Clean up all test data
    pub async fn cleanup(&self) {
        sqlx::query("TRUNCATE TABLE price_history, price_quotes RESTART IDENTITY CASCADE")
            .execute(&self.pool)
            .await
            .expect("Failed to cleanup test data");
    }
}

/// Whole VND amount
pub fn vnd(amount: i64) -> Decimal {
    Decimal::new(amount, 0)
}

pub fn quote_form(label: &str, buy: i64, sell: i64) -> NewPriceQuote {
    NewPriceQuote::new(label, vnd(buy), vnd(sell))
}

#[derive(Default)]
struct MemoryState {
    quotes: Vec<PriceQuote>,
    history: Vec<PriceHistoryEntry>,
    next_id: i64,
    next_history_id: i64,
}

impl MemoryState {
    fn record_history(&mut self, quote: &PriceQuote) {
        self.next_history_id += 1;
        self.history.push(PriceHistoryEntry {
            id: self.next_history_id,
            product_label: quote.product_label.clone(),
            buy_price: quote.buy_price,
            sell_price: quote.sell_price,
            changed_at: quote.updated_at,
        });
    }
}

/// In-memory quote and history tables.
///
/// Mirrors the database triggers: history rows are appended when prices
/// change, and with a feed attached every write emits a change event.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    feed: Option<mpsc::Sender<FeedItem>>,
    writes: AtomicUsize,
    reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose writes are announced on the returned receiver
    pub fn with_feed() -> (Self, mpsc::Receiver<FeedItem>) {
        let (tx, rx) = mpsc::channel(64);
        let store = Self {
            feed: Some(tx),
            ..Self::default()
        };
        (store, rx)
    }

    /// Insert a row without announcing it
    pub fn seed_quote(&self, label: &str, buy: i64, sell: i64) -> PriceQuote {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let quote = PriceQuote {
            id: state.next_id,
            product_label: label.to_string(),
            buy_price: vnd(buy),
            sell_price: vnd(sell),
            unit_label: DEFAULT_UNIT_LABEL.to_string(),
            updated_at: Utc::now(),
        };
        state.quotes.push(quote.clone());
        state.record_history(&quote);
        quote
    }

    /// Append a history row at a given time
    pub fn seed_history(&self, label: &str, buy: i64, sell: i64, changed_at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        state.next_history_id += 1;
        let id = state.next_history_id;
        state.history.push(PriceHistoryEntry {
            id,
            product_label: label.to_string(),
            buy_price: vnd(buy),
            sell_price: vnd(sell),
            changed_at,
        });
    }

    pub fn quotes(&self) -> Vec<PriceQuote> {
        self.state.lock().unwrap().quotes.clone()
    }

    pub fn history(&self, label: &str) -> Vec<PriceHistoryEntry> {
        self.state
            .lock()
            .unwrap()
            .history
            .iter()
            .filter(|e| e.product_label == label)
            .cloned()
            .collect()
    }

    /// Number of write calls that reached the store
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn announce(&self, event: ChangeEvent) {
        if let Some(feed) = &self.feed {
            let _ = feed.send(FeedItem::Change(event)).await;
        }
    }
}

#[async_trait]
impl QuoteStore for MemoryStore {
    async fn fetch_quotes(&self) -> Result<Vec<PriceQuote>, RepositoryError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.quotes())
    }

    async fn create_quote(&self, form: &NewPriceQuote) -> Result<PriceQuote, RepositoryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let quote = {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let quote = PriceQuote {
                id: state.next_id,
                product_label: form.label().to_string(),
                buy_price: form.buy_price,
                sell_price: form.sell_price,
                unit_label: form.unit().to_string(),
                updated_at: Utc::now(),
            };
            state.quotes.push(quote.clone());
            state.record_history(&quote);
            quote
        };
        self.announce(ChangeEvent::Insert {
            record: quote.clone(),
        })
        .await;
        Ok(quote)
    }

    async fn update_quote(
        &self,
        id: i64,
        form: &NewPriceQuote,
    ) -> Result<Option<PriceQuote>, RepositoryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let updated = {
            let mut state = self.state.lock().unwrap();
            let Some(index) = state.quotes.iter().position(|q| q.id == id) else {
                return Ok(None);
            };
            let previous = state.quotes[index].clone();
            let quote = PriceQuote {
                id,
                product_label: form.label().to_string(),
                buy_price: form.buy_price,
                sell_price: form.sell_price,
                unit_label: form.unit().to_string(),
                updated_at: Utc::now(),
            };
            state.quotes[index] = quote.clone();
            if previous.buy_price != quote.buy_price || previous.sell_price != quote.sell_price {
                state.record_history(&quote);
            }
            quote
        };
        self.announce(ChangeEvent::Update {
            record: updated.clone(),
        })
        .await;
        Ok(Some(updated))
    }

    async fn delete_quote(&self, id: i64) -> Result<bool, RepositoryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let removed = {
            let mut state = self.state.lock().unwrap();
            let before = state.quotes.len();
            state.quotes.retain(|q| q.id != id);
            state.quotes.len() != before
        };
        if removed {
            self.announce(ChangeEvent::Delete { old_id: id }).await;
        }
        Ok(removed)
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn fetch_history(
        &self,
        product_label: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceHistoryEntry>, RepositoryError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut rows: Vec<_> = self
            .history(product_label)
            .into_iter()
            .filter(|e| e.changed_at >= since)
            .collect();
        rows.sort_by_key(|e| e.id);
        Ok(rows)
    }
}
