//! Cong Ngoc Backend Service
//!
//! Main entry point for the gold price board backend.
//! This service provides:
//! - A live mirror of the price table fed by PostgreSQL LISTEN/NOTIFY
//! - WebSocket server for the display screens, history charts and admin edits

use congngoc_backend::change_feed::PgChangeFeed;
use congngoc_backend::database::{create_pool_for_channel, run_migrations};
use congngoc_backend::repositories::{HistoryStore, QuoteStore};
use congngoc_backend::services::QuoteBoard;
use congngoc_backend::websocket::WebSocketServer;
use congngoc_backend::{AppConfig, AppError, AppResult, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load environment variables first
    dotenv::dotenv().ok();

    // Load configuration
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        AppError::Config(e)
    })?;

    // Initialize tracing/logging with config
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("congngoc_backend={},sqlx=warn", config.log_level).into()
    });
    if config.is_production() {
        // one JSON object per line for the log collector
        tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           Cong Ngoc Price Board Starting                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Environment: {}", config.environment);
    info!("Log level: {}", config.log_level);
    info!("WebSocket port: {}", config.ws_port);
    info!("Change feed channel: {}", config.feed.channel);

    // =========================================================================
    // DATABASE SETUP
    // =========================================================================
    info!("Connecting to database...");

    let pool = create_pool_for_channel(&config.database, &config.feed.channel)
        .await
        .map_err(|e| {
            error!("Failed to create database pool: {}", e);
            AppError::Database(e)
        })?;

    info!("Database connection pool created successfully");
    info!("Max connections: {}", config.database.max_connections);

    info!("Running database migrations...");
    run_migrations(&pool, None).await.map_err(|e| {
        error!("Database migration failed: {}", e);
        AppError::Database(e)
    })?;

    info!("Database migrations completed successfully");

    let app_state = AppState::new(pool.clone());
    info!("✓ Application state initialized with repositories");

    // =========================================================================
    // QUOTE BOARD
    // =========================================================================
    // Subscribe before the first read so no change falls in between
    let feed = PgChangeFeed::connect(&pool, &config.feed.channel).await?;
    info!("✓ Change feed subscribed on {}", feed.channel());

    let quote_store: Arc<dyn QuoteStore> = app_state.quote_repo.clone();
    let history_store: Arc<dyn HistoryStore> = app_state.history_repo.clone();

    let board = QuoteBoard::new(Arc::clone(&quote_store)).spawn(feed);
    info!("✓ Quote board started");

    // =========================================================================
    // START SERVERS
    // =========================================================================
    let ws_server = WebSocketServer::new(board.watch(), quote_store, history_store)
        .with_refresh_interval(config.feed.refresh_interval());

    let ws_addr: SocketAddr = format!("0.0.0.0:{}", config.ws_port)
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid WebSocket address: {}", e)))?;

    info!("Starting WebSocket server on {}...", ws_addr);

    let listener = TcpListener::bind(ws_addr)
        .await
        .map_err(|e| AppError::Message(format!("Failed to bind WebSocket server: {}", e)))?;

    let mut ws_handle = tokio::spawn(ws_server.serve(listener));
    info!("✓ WebSocket server started on {}", ws_addr);

    // =========================================================================
    // READY
    // =========================================================================
    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           Cong Ngoc Price Board Ready!                   ║");
    info!("╠══════════════════════════════════════════════════════════╣");
    info!("║  WebSocket:    0.0.0.0:{}                              ║", config.ws_port);
    info!("║  Environment:  {}                                    ║", config.environment);
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Press Ctrl+C to shutdown gracefully");

    // =========================================================================
    // SHUTDOWN HANDLING
    // =========================================================================
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, shutting down gracefully...");
        }
        _ = &mut ws_handle => {
            error!("WebSocket server exited unexpectedly");
        }
    }

    ws_handle.abort();
    board.shutdown();
    app_state.database.pool().close().await;

    info!("Cong Ngoc backend service shutdown complete");
    Ok(())
}
