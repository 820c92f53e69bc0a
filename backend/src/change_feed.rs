//! Row-level change notifications for the `price_quotes` table.
//!
//! The migrations install a trigger that `pg_notify`s a JSON payload for
//! every insert, update and delete. [`PgChangeFeed`] listens on that
//! channel and turns payloads into [`ChangeEvent`]s.

use crate::models::{ChangeEvent, ChangePayload};
use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Errors produced while following the change feed
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to listen on channel {channel}: {source}")]
    Listen {
        channel: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to receive notification: {0}")]
    Receive(sqlx::Error),

    #[error("Malformed change payload: {0}")]
    Malformed(String),

    #[error("Change feed closed")]
    Closed,
}

/// What a change source yields
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Change(ChangeEvent),
    /// The connection dropped and was re-established; notifications sent
    /// in between are gone, so held state must be re-read.
    Resync,
}

/// Anything the quote board can pull change events from
#[async_trait]
pub trait ChangeSource: Send {
    async fn next_item(&mut self) -> Result<FeedItem, FeedError>;
}

/// Decode one NOTIFY payload
pub fn parse_payload(payload: &str) -> Result<ChangeEvent, FeedError> {
    let raw: ChangePayload =
        serde_json::from_str(payload).map_err(|e| FeedError::Malformed(e.to_string()))?;
    ChangeEvent::try_from(raw).map_err(FeedError::Malformed)
}

/// `LISTEN` subscription on the quote change channel.
///
/// Dropping it closes the listener connection, which ends the subscription.
pub struct PgChangeFeed {
    listener: PgListener,
    channel: String,
}

impl PgChangeFeed {
    /// Open a dedicated connection and start listening.
    ///
    /// Call this before reading the initial quote list so no change slips
    /// between the read and the subscription.
    pub async fn connect(pool: &PgPool, channel: &str) -> Result<Self, FeedError> {
        let listen_error = |source| FeedError::Listen {
            channel: channel.to_string(),
            source,
        };

        let mut listener = PgListener::connect_with(pool).await.map_err(listen_error)?;
        listener.listen(channel).await.map_err(listen_error)?;

        info!("Listening for quote changes on channel {}", channel);

        Ok(Self {
            listener,
            channel: channel.to_string(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Stop listening and close the connection
    pub async fn unsubscribe(mut self) -> Result<(), FeedError> {
        self.listener
            .unlisten(&self.channel)
            .await
            .map_err(FeedError::Receive)?;
        info!("Stopped listening on channel {}", self.channel);
        Ok(())
    }
}

#[async_trait]
impl ChangeSource for PgChangeFeed {
    async fn next_item(&mut self) -> Result<FeedItem, FeedError> {
        // try_recv reports a lost connection as Ok(None); the listener
        // reconnects and re-issues LISTEN on the next call.
        match self.listener.try_recv().await {
            Ok(Some(notification)) => {
                debug!(
                    channel = notification.channel(),
                    "Received quote change notification"
                );
                parse_payload(notification.payload()).map(FeedItem::Change)
            }
            Ok(None) => {
                warn!("Change feed connection lost on channel {}", self.channel);
                Ok(FeedItem::Resync)
            }
            Err(e) => Err(FeedError::Receive(e)),
        }
    }
}

/// In-process source, used to drive the board from a channel
#[async_trait]
impl ChangeSource for mpsc::Receiver<FeedItem> {
    async fn next_item(&mut self) -> Result<FeedItem, FeedError> {
        self.recv().await.ok_or(FeedError::Closed)
    }
}
