//! Shared fixtures for watcher integration tests.
//!
//! `FeedServer` is an in-process stand-in for the Coinbase Pro feed. It
//! records every subscription it receives and then plays a fixed script on
//! each connection.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use coinbase_notifier::{
    CatalogError, NotificationSink, ProductCatalog, ProductSource, ReconnectConfig, SinkError,
    UserId, WatcherConfig,
};

// =============================================================================
// Feed Server
// =============================================================================

/// What the server does after accepting a connection.
#[derive(Debug, Clone)]
pub enum Script {
    /// Read the subscription, send `frames`, then read until the client
    /// leaves, answering pings along the way.
    Frames(Vec<String>),
    /// Read the subscription, acknowledge it, then close.
    AckThenClose,
    /// Complete the handshake and close without reading anything.
    CloseImmediately,
    /// Read the subscription and then go quiet without reading further.
    Silent,
}

#[derive(Default)]
struct ServerState {
    connections: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    pings: AtomicUsize,
    subscriptions: Mutex<Vec<serde_json::Value>>,
}

/// In-process WebSocket feed.
pub struct FeedServer {
    /// `ws://` URL of the server.
    pub url: String,
    state: Arc<ServerState>,
}

impl FeedServer {
    /// Bind to an ephemeral localhost port and serve `script` on every connection.
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let state = Arc::new(ServerState::default());

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, Arc::clone(&accept_state), script.clone()));
            }
        });

        Self { url, state }
    }

    /// TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections observed.
    pub fn max_live(&self) -> usize {
        self.state.max_live.load(Ordering::SeqCst)
    }

    /// Protocol pings received across all connections.
    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    /// Subscription envelopes received, in arrival order.
    pub fn subscriptions(&self) -> Vec<serde_json::Value> {
        self.state.subscriptions.lock().clone()
    }
}

async fn serve(stream: TcpStream, state: Arc<ServerState>, script: Script) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    if matches!(script, Script::CloseImmediately) {
        let _ = ws.close(None).await;
        return;
    }

    state.live.fetch_add(1, Ordering::SeqCst);
    // Give a closing predecessor time to be observed before sampling.
    tokio::time::sleep(Duration::from_millis(50)).await;
    state
        .max_live
        .fetch_max(state.live.load(Ordering::SeqCst), Ordering::SeqCst);

    if let Some(Ok(Message::Text(text))) = ws.next().await
        && let Ok(value) = serde_json::from_str::<serde_json::Value>(&text)
    {
        state.subscriptions.lock().push(value);
    }

    match script {
        Script::Frames(frames) => {
            for frame in frames {
                if ws.send(Message::text(frame)).await.is_err() {
                    break;
                }
            }
            // Reading also answers pings with pongs.
            while let Some(Ok(message)) = ws.next().await {
                if message.is_ping() {
                    state.pings.fetch_add(1, Ordering::SeqCst);
                }
                if message.is_close() {
                    break;
                }
            }
        }
        Script::AckThenClose => {
            let _ = ws.send(Message::text(subscriptions_ack())).await;
            let _ = ws.close(None).await;
        }
        Script::Silent => {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Script::CloseImmediately => {}
    }

    state.live.fetch_sub(1, Ordering::SeqCst);
}

// =============================================================================
// Frames
// =============================================================================

/// Subscription acknowledgement for the `user` channel.
pub fn subscriptions_ack() -> String {
    serde_json::json!({
        "type": "subscriptions",
        "channels": [{"name": "user", "product_ids": ["BTC-EUR", "ETH-EUR"]}]
    })
    .to_string()
}

/// `open` frame for `order_id`.
pub fn open_frame(order_id: &str, size: &str) -> String {
    serde_json::json!({
        "type": "open",
        "time": "2021-03-14T09:26:53.123456Z",
        "product_id": "BTC-EUR",
        "sequence": 10,
        "order_id": order_id,
        "price": "42000.00",
        "remaining_size": size,
        "side": "buy",
        "user_id": "u-1",
        "profile_id": "p-1"
    })
    .to_string()
}

/// `done` frame for `order_id`.
pub fn done_frame(order_id: &str, reason: &str, remaining: &str) -> String {
    serde_json::json!({
        "type": "done",
        "time": "2021-03-14T09:30:00.000000Z",
        "product_id": "BTC-EUR",
        "sequence": 11,
        "order_id": order_id,
        "price": "42000.00",
        "remaining_size": remaining,
        "reason": reason,
        "side": "buy",
        "order_type": "limit",
        "user_id": "u-1",
        "profile_id": "p-1"
    })
    .to_string()
}

/// `received` frame, which never produces a notification.
pub fn received_frame(order_id: &str) -> String {
    serde_json::json!({
        "type": "received",
        "time": "2021-03-14T09:26:53.000000Z",
        "product_id": "BTC-EUR",
        "sequence": 9,
        "order_id": order_id,
        "size": "1.00000000",
        "price": "42000.00",
        "side": "buy",
        "order_type": "limit"
    })
    .to_string()
}

// =============================================================================
// Collaborators
// =============================================================================

/// Where a recorded message went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A user's chat.
    User(UserId, String),
    /// The admin chat.
    Admin(String),
}

/// Sink that records every delivery.
#[derive(Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingSink {
    /// Everything delivered so far.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Texts delivered to `user`.
    pub fn user_texts(&self, user: UserId) -> Vec<String> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::User(id, text) if *id == user => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Texts delivered to the admin chat.
    pub fn admin_texts(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Admin(text) => Some(text.clone()),
                Delivery::User(..) => None,
            })
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send_to_user(&self, user: UserId, text: &str) -> Result<(), SinkError> {
        self.deliveries
            .lock()
            .push(Delivery::User(user, text.to_string()));
        Ok(())
    }

    async fn send_to_admin(&self, text: &str) -> Result<(), SinkError> {
        self.deliveries.lock().push(Delivery::Admin(text.to_string()));
        Ok(())
    }
}

/// Sink that holds every user delivery until [`GatedSink::open`] is called.
pub struct GatedSink {
    inner: RecordingSink,
    gate: tokio::sync::watch::Sender<bool>,
    attempts: AtomicUsize,
}

impl Default for GatedSink {
    fn default() -> Self {
        Self {
            inner: RecordingSink::default(),
            gate: tokio::sync::watch::Sender::new(false),
            attempts: AtomicUsize::new(0),
        }
    }
}

impl GatedSink {
    /// Let held and future deliveries through.
    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    /// User deliveries started so far, including held ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Texts delivered to `user` after the gate opened.
    pub fn user_texts(&self, user: UserId) -> Vec<String> {
        self.inner.user_texts(user)
    }
}

#[async_trait]
impl NotificationSink for GatedSink {
    async fn send_to_user(&self, user: UserId, text: &str) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        self.inner.send_to_user(user, text).await
    }

    async fn send_to_admin(&self, text: &str) -> Result<(), SinkError> {
        self.inner.send_to_admin(text).await
    }
}

/// Product source with a fixed list.
pub struct StaticProducts(pub Vec<&'static str>);

#[async_trait]
impl ProductSource for StaticProducts {
    async fn fetch_product_ids(&self) -> Result<Vec<String>, CatalogError> {
        Ok(self.0.iter().map(|s| (*s).to_string()).collect())
    }
}

/// Catalog loaded with `BTC-EUR` and `ETH-EUR`.
pub async fn loaded_catalog() -> Arc<ProductCatalog> {
    let catalog = Arc::new(ProductCatalog::new(
        Arc::new(StaticProducts(vec!["ETH-EUR", "BTC-EUR"])),
        Duration::from_secs(3600),
    ));
    catalog.refresh().await.unwrap();
    catalog
}

/// Watcher settings pointed at `url` with fast retries.
pub fn fast_config(url: &str, max_attempts: u32) -> WatcherConfig {
    WatcherConfig {
        url: url.to_string(),
        reconnect: ReconnectConfig::new(
            Duration::from_millis(10),
            Duration::from_millis(40),
            2.0,
            0.0,
            max_attempts,
        ),
        ..WatcherConfig::default()
    }
}

/// Poll `condition` every 10ms until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
