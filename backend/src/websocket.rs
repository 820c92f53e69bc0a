use crate::error::{AppError, AppResult};
use crate::models::{HistoryRange, NewPriceQuote};
use crate::presentation::{admin_rows, chart_points, render_rows, ChartPoint, QuoteRow};
use crate::repositories::{HistoryStore, QuoteStore};
use crate::services::{product_labels, AdminService, BoardSnapshot, HistorySnapshot, HistoryView};
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::{self, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Channel carrying the live price table
pub const QUOTES_CHANNEL: &str = "quotes";

/// Messages sent by display and admin clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        channel: String,
    },
    Unsubscribe {
        channel: String,
    },
    FetchHistory {
        product_label: String,
        #[serde(default)]
        range: HistoryRange,
    },
    ListProducts,
    ListQuotes,
    CreateQuote {
        quote: NewPriceQuote,
    },
    UpdateQuote {
        id: i64,
        quote: NewPriceQuote,
    },
    DeleteQuote {
        id: i64,
        #[serde(default)]
        confirmed: bool,
    },
}

/// Messages pushed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        client_id: String,
    },
    Subscribed {
        channel: String,
    },
    Unsubscribed {
        channel: String,
    },
    QuoteSnapshot {
        version: u64,
        rows: Vec<QuoteRow>,
    },
    History {
        seq: u64,
        product_label: String,
        range: HistoryRange,
        points: Vec<ChartPoint>,
    },
    Products {
        labels: Vec<String>,
    },
    /// Editor listing, most recently edited first
    AdminQuotes {
        version: u64,
        rows: Vec<QuoteRow>,
    },
    Ack {
        action: String,
        id: i64,
    },
    Error {
        message: String,
    },
}

type WsSink<S> = Arc<Mutex<SplitSink<WebSocketStream<S>, Message>>>;

/// WebSocket server for the price table, the history chart and admin edits
#[derive(Clone)]
pub struct WebSocketServer {
    /// Active subscriptions: channel -> client IDs
    subscriptions: Arc<RwLock<HashMap<String, Vec<Uuid>>>>,
    /// Client subscriptions: client_id -> channels
    client_channels: Arc<RwLock<HashMap<Uuid, Vec<String>>>>,
    board: watch::Receiver<BoardSnapshot>,
    history_store: Arc<dyn HistoryStore>,
    admin: Arc<AdminService<dyn QuoteStore>>,
    refresh_interval: Duration,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new(
        board: watch::Receiver<BoardSnapshot>,
        quote_store: Arc<dyn QuoteStore>,
        history_store: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            client_channels: Arc::new(RwLock::new(HashMap::new())),
            board,
            history_store,
            admin: Arc::new(AdminService::new(quote_store)),
            refresh_interval: Duration::from_secs(1),
        }
    }

    /// Set how often subscribers get re-rendered rows
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Subscribe a client to a channel
    pub async fn subscribe(&self, client_id: Uuid, channel: String) {
        let mut subscriptions = self.subscriptions.write().await;
        let mut client_channels = self.client_channels.write().await;

        let subscribers = subscriptions.entry(channel.clone()).or_insert_with(Vec::new);
        if !subscribers.contains(&client_id) {
            subscribers.push(client_id);
        }

        let channels = client_channels.entry(client_id).or_insert_with(Vec::new);
        if !channels.contains(&channel) {
            channels.push(channel.clone());
        }

        info!("Client {} subscribed to {}", client_id, channel);
    }

    /// Unsubscribe a client from a channel
    pub async fn unsubscribe(&self, client_id: Uuid, channel: &str) {
        let mut subscriptions = self.subscriptions.write().await;
        let mut client_channels = self.client_channels.write().await;

        if let Some(subscribers) = subscriptions.get_mut(channel) {
            subscribers.retain(|&id| id != client_id);
            if subscribers.is_empty() {
                subscriptions.remove(channel);
            }
        }

        if let Some(channels) = client_channels.get_mut(&client_id) {
            channels.retain(|c| c != channel);
            if channels.is_empty() {
                client_channels.remove(&client_id);
            }
        }

        info!("Client {} unsubscribed from {}", client_id, channel);
    }

    /// Get all channels a client is subscribed to
    pub async fn get_client_channels(&self, client_id: Uuid) -> Vec<String> {
        let client_channels = self.client_channels.read().await;
        client_channels.get(&client_id).cloned().unwrap_or_default()
    }

    /// Number of clients on a channel
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        let subscriptions = self.subscriptions.read().await;
        subscriptions.get(channel).map(Vec::len).unwrap_or(0)
    }

    /// Check if client is subscribed to a channel
    pub async fn is_client_subscribed(&self, client_id: Uuid, channel: &str) -> bool {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .get(channel)
            .map(|subscribers| subscribers.contains(&client_id))
            .unwrap_or(false)
    }

    /// Render the board as it stands now
    pub fn snapshot_message(&self) -> ServerMessage {
        let snapshot = self.board.borrow().clone();
        render_snapshot(&snapshot)
    }

    /// Handle one client message, returning the immediate replies.
    ///
    /// History results are not returned here; they arrive through
    /// `history`'s watch channel once the query finishes.
    pub async fn handle_message(
        &self,
        client_id: Uuid,
        message: ClientMessage,
        history: &HistoryView<dyn HistoryStore>,
    ) -> Vec<ServerMessage> {
        match message {
            ClientMessage::Subscribe { channel } => {
                if channel != QUOTES_CHANNEL {
                    return vec![error_message(format!("Unknown channel: {}", channel))];
                }
                self.subscribe(client_id, channel.clone()).await;
                vec![ServerMessage::Subscribed { channel }, self.snapshot_message()]
            }
            ClientMessage::Unsubscribe { channel } => {
                self.unsubscribe(client_id, &channel).await;
                vec![ServerMessage::Unsubscribed { channel }]
            }
            ClientMessage::FetchHistory {
                product_label,
                range,
            } => {
                if product_label.trim().is_empty() {
                    return vec![error_message("Product label must not be empty")];
                }
                // the handle is not awaited; the watch channel carries the result
                let _ = history.request(&product_label, range);
                vec![]
            }
            ClientMessage::ListProducts => {
                let snapshot = self.board.borrow().clone();
                vec![ServerMessage::Products {
                    labels: product_labels(&snapshot.quotes),
                }]
            }
            ClientMessage::ListQuotes => {
                let snapshot = self.board.borrow().clone();
                vec![ServerMessage::AdminQuotes {
                    version: snapshot.version,
                    rows: admin_rows(&snapshot.quotes, Utc::now()),
                }]
            }
            ClientMessage::CreateQuote { quote } => {
                ack_or_error("create", self.admin.create_quote(&quote).await.map(|q| q.id))
            }
            ClientMessage::UpdateQuote { id, quote } => {
                ack_or_error("update", self.admin.update_quote(id, &quote).await.map(|q| q.id))
            }
            ClientMessage::DeleteQuote { id, confirmed } => {
                ack_or_error("delete", self.admin.delete_quote(id, confirmed).await.map(|_| id))
            }
        }
    }

    /// Accept connections until the listener fails hard
    pub async fn serve(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("New WebSocket connection from {}", addr);
                    let ws = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = ws.handle_connection(stream).await {
                            error!("WebSocket connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("WebSocket accept error: {}", e);
                }
            }
        }
    }

    /// Handle a new WebSocket connection
    pub async fn handle_connection<S>(&self, stream: S) -> AppResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| AppError::Message(format!("WebSocket handshake failed: {}", e)))?;

        let (ws_sender, mut ws_receiver) = ws_stream.split();
        let ws_sender: WsSink<S> = Arc::new(Mutex::new(ws_sender));
        let client_id = Uuid::new_v4();

        info!("New WebSocket connection: {}", client_id);

        send_message(
            &ws_sender,
            &ServerMessage::Connected {
                client_id: client_id.to_string(),
            },
        )
        .await;

        let history = HistoryView::new(Arc::clone(&self.history_store));
        let history_rx = history.watch();

        // Spawn task to handle incoming messages
        let ws_server_for_receiver = self.clone();
        let ws_sender_for_receiver = Arc::clone(&ws_sender);
        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let replies = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => {
                                ws_server_for_receiver
                                    .handle_message(client_id, message, &history)
                                    .await
                            }
                            Err(e) => {
                                warn!("Failed to parse message from client {}: {}", client_id, e);
                                vec![error_message("Invalid message format")]
                            }
                        };
                        for reply in &replies {
                            send_message(&ws_sender_for_receiver, reply).await;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("WebSocket connection closed: {}", client_id);
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            // Clean up all subscriptions for this client
            let channels = ws_server_for_receiver.get_client_channels(client_id).await;
            for channel in channels {
                ws_server_for_receiver.unsubscribe(client_id, &channel).await;
            }
            // dropping `history` here ends the push task below
        });

        // Spawn task to push board and history updates to the client
        let ws_server = self.clone();
        tokio::spawn(async move {
            ws_server.push_updates(client_id, ws_sender, history_rx).await;
            debug!("Push task for client {} finished", client_id);
        });

        Ok(())
    }

    async fn push_updates<S>(
        &self,
        client_id: Uuid,
        ws_sender: WsSink<S>,
        mut history_rx: watch::Receiver<HistorySnapshot>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut board_rx = self.board.clone();
        let mut ticker = time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let message = tokio::select! {
                changed = board_rx.changed() => {
                    if changed.is_err() {
                        warn!("Quote board stopped; no more table updates for {}", client_id);
                        break;
                    }
                    let snapshot = board_rx.borrow_and_update().clone();
                    if !self.is_client_subscribed(client_id, QUOTES_CHANNEL).await {
                        continue;
                    }
                    render_snapshot(&snapshot)
                }
                _ = ticker.tick() => {
                    // elapsed labels move even when prices do not
                    if !self.is_client_subscribed(client_id, QUOTES_CHANNEL).await {
                        continue;
                    }
                    self.snapshot_message()
                }
                changed = history_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = history_rx.borrow_and_update().clone();
                    if snapshot.loading || snapshot.seq == 0 {
                        continue;
                    }
                    ServerMessage::History {
                        seq: snapshot.seq,
                        product_label: snapshot.product_label.unwrap_or_default(),
                        range: snapshot.range,
                        points: chart_points(&snapshot.entries),
                    }
                }
            };

            if !send_message(&ws_sender, &message).await {
                break;
            }
        }
    }
}

fn render_snapshot(snapshot: &BoardSnapshot) -> ServerMessage {
    ServerMessage::QuoteSnapshot {
        version: snapshot.version,
        rows: render_rows(&snapshot.quotes, Utc::now()),
    }
}

fn error_message(message: impl Into<String>) -> ServerMessage {
    ServerMessage::Error {
        message: message.into(),
    }
}

fn ack_or_error(action: &str, result: AppResult<i64>) -> Vec<ServerMessage> {
    match result {
        Ok(id) => vec![ServerMessage::Ack {
            action: action.to_string(),
            id,
        }],
        Err(e) => {
            warn!("Admin {} failed: {}", action, e);
            vec![error_message(e.to_string())]
        }
    }
}

/// Serialize and send; false once the client is gone
async fn send_message<S>(sender: &WsSink<S>, message: &ServerMessage) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            return true;
        }
    };

    let mut sender = sender.lock().await;
    if let Err(e) = sender.send(Message::Text(json)).await {
        debug!("Failed to send message: {}", e);
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_format() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"fetch_history","product_label":"SJC","range":"30d"}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::FetchHistory {
                product_label: "SJC".to_string(),
                range: HistoryRange::Month,
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"fetch_history","product_label":"SJC"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::FetchHistory {
                range: HistoryRange::Week,
                ..
            }
        ));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"delete_quote","id":3}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::DeleteQuote {
                id: 3,
                confirmed: false
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"list_products"}"#).unwrap();
        assert_eq!(msg, ClientMessage::ListProducts);

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"list_quotes"}"#).unwrap();
        assert_eq!(msg, ClientMessage::ListQuotes);

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"fetch_history","product_label":"SJC","range":" 1D "}"#)
                .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::FetchHistory {
                range: HistoryRange::Day,
                ..
            }
        ));

        let err = serde_json::from_str::<ClientMessage>(
            r#"{"type":"fetch_history","product_label":"SJC","range":"1y"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_server_message_wire_format() {
        let json = serde_json::to_value(ServerMessage::Ack {
            action: "delete".to_string(),
            id: 3,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "ack", "action": "delete", "id": 3}));

        let json = serde_json::to_value(ServerMessage::QuoteSnapshot {
            version: 2,
            rows: vec![],
        })
        .unwrap();
        assert_eq!(json["type"], "quote_snapshot");
    }
}
