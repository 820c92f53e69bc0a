//! Cong Ngoc gold price board backend
//!
//! Mirrors the `price_quotes` table from its change feed, serves the live
//! table and price history charts over WebSocket, and applies admin edits.

pub mod change_feed;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod presentation;
pub mod reconciler;
pub mod repositories;
pub mod services;
pub mod time_ago;
pub mod websocket;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AppError, AppResult};

use database::Database;
use repositories::*;
use std::sync::Arc;

/// Application state containing the database and repositories
pub struct AppState {
    pub database: Database,
    pub quote_repo: Arc<PriceQuoteRepository>,
    pub history_repo: Arc<PriceHistoryRepository>,
}

impl AppState {
    /// Create a new AppState with initialized repositories
    pub fn new(pool: sqlx::PgPool) -> Self {
        let database = Database::new(pool.clone());

        Self {
            database,
            quote_repo: Arc::new(PriceQuoteRepository::new(pool.clone())),
            history_repo: Arc::new(PriceHistoryRepository::new(pool)),
        }
    }
}
