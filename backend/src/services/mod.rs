pub mod admin_service;
pub mod history_view;
pub mod quote_board;

pub use admin_service::AdminService;
pub use history_view::{product_labels, HistorySnapshot, HistoryView};
pub use quote_board::{BoardHandle, BoardSnapshot, QuoteBoard};
