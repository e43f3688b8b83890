//! Order Watcher
//!
//! One watcher per active user. It owns exactly one authenticated WebSocket
//! connection to the Coinbase Pro feed and runs two tasks:
//!
//! - **run task**: connect, sign and send the `user` subscription, read
//!   frames, keep the connection alive, and reconnect with backoff. The
//!   [`ReconnectPolicy`] lives here and nowhere else.
//! - **drain task**: render queued order events and deliver them through the
//!   [`NotificationSink`], in the order the frames arrived.
//!
//! The two tasks are joined by a bounded queue. A full queue blocks the run
//! task instead of dropping events.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──start──► Running ◄──► Reconnecting{attempt} ──cap──► Terminated
//!    │                  │                                          ▲
//!    └──────stop────────┴──────────────────stop────────────────────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::auth::{AuthError, RequestSigner};
use super::codec::{CodecError, JsonCodec};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, ReadDeadline};
use super::messages::{ErrorMessage, StreamMessage};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    NotificationSink, WatcherFactory, WatcherHandle, WatcherStatus,
};
use crate::application::services::ProductCatalog;
use crate::domain::credentials::{UserCredential, UserId};
use crate::domain::notification::NotificationEvent;
use crate::infrastructure::metrics;

/// Default feed URL.
pub const DEFAULT_WEBSOCKET_URL: &str = "wss://ws-feed.pro.coinbase.com";

/// Sent to the user when the venue rejects their API settings.
pub const AUTH_FAILED_USER_MESSAGE: &str = "Coinbase Pro authentication failed. Please check your API-Settings, in order to get informed about your order changes.";

// =============================================================================
// Error Type
// =============================================================================

/// Connection-level failures. All of them lead to a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// WebSocket handshake failed.
    #[error("WebSocket connection failed: {0}")]
    Connect(#[source] tungstenite::Error),

    /// WebSocket handshake did not finish in time.
    #[error("WebSocket connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// WebSocket read or write failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// A write did not complete in time.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// No frame arrived within the read deadline.
    #[error("no frame received for {0:?}")]
    ReadTimeout(Duration),

    /// Server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Subscription could not be signed.
    #[error("failed to sign subscription: {0}")]
    Sign(#[from] AuthError),

    /// Subscription could not be encoded.
    #[error("failed to encode subscription: {0}")]
    Encode(#[from] CodecError),
}

impl WatcherError {
    /// Metric label for the error.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::WebSocket(_) => "websocket",
            Self::WriteTimeout(_) => "write_timeout",
            Self::ReadTimeout(_) => "read_timeout",
            Self::ConnectionClosed => "closed",
            Self::Sign(_) => "sign",
            Self::Encode(_) => "encode",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Settings shared by every watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Feed URL.
    pub url: String,
    /// Ping interval and read deadline.
    pub heartbeat: HeartbeatConfig,
    /// Backoff schedule and retry cap.
    pub reconnect: ReconnectConfig,
    /// Deadline for every outbound frame.
    pub write_timeout: Duration,
    /// Optional deadline for the WebSocket handshake. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Capacity of the per-user notification queue.
    pub queue_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WEBSOCKET_URL.to_string(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            write_timeout: Duration::from_secs(3),
            connect_timeout: None,
            queue_capacity: 5,
        }
    }
}

/// Collaborators handed to every watcher.
#[derive(Clone)]
pub struct WatcherContext {
    /// Shared settings.
    pub config: Arc<WatcherConfig>,
    /// Product ids to subscribe to.
    pub catalog: Arc<ProductCatalog>,
    /// Notification destination.
    pub sink: Arc<dyn NotificationSink>,
}

impl WatcherContext {
    /// Bundle watcher collaborators.
    #[must_use]
    pub fn new(
        config: WatcherConfig,
        catalog: Arc<ProductCatalog>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            catalog,
            sink,
        }
    }
}

// =============================================================================
// Watcher
// =============================================================================

/// Handle to one user's watcher.
///
/// Dropping the handle stops the watcher.
pub struct Watcher {
    user_id: UserId,
    cancel: CancellationToken,
    status: watch::Receiver<WatcherStatus>,
    pending: Mutex<Option<Session>>,
}

impl Watcher {
    /// Create a watcher in the `Created` state. Nothing runs until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(credential: UserCredential, context: WatcherContext) -> Self {
        let cancel = CancellationToken::new();
        let (status_tx, status) = watch::channel(WatcherStatus::Created);

        Self {
            user_id: credential.id,
            cancel: cancel.clone(),
            status,
            pending: Mutex::new(Some(Session {
                signer: RequestSigner::from_credential(&credential),
                credential,
                context,
                codec: JsonCodec::new(),
                cancel,
                status_tx,
            })),
        }
    }

    /// Spawn the watcher's tasks.
    pub fn start(&self) {
        self.start_after(None);
    }

    /// Spawn the watcher's tasks once `predecessor` has fully stopped.
    ///
    /// `predecessor` is stopped here. Starting twice does nothing.
    pub fn start_after(&self, predecessor: Option<Box<dyn WatcherHandle>>) {
        let Some(session) = self.pending.lock().take() else {
            tracing::warn!(user_id = %self.user_id, "Watcher already started");
            return;
        };

        if let Some(previous) = &predecessor {
            previous.stop();
        }
        tokio::spawn(session.run(predecessor));
    }
}

#[async_trait]
impl WatcherHandle for Watcher {
    fn user_id(&self) -> UserId {
        self.user_id
    }

    fn status(&self) -> WatcherStatus {
        *self.status.borrow()
    }

    fn stop(&self) {
        self.cancel.cancel();
        if let Some(session) = self.pending.lock().take() {
            session.status_tx.send_replace(WatcherStatus::Terminated);
        }
    }

    async fn stopped(&self) {
        let mut status = self.status.clone();
        // A closed channel means the run task is gone as well.
        let _ = status.wait_for(|s| s.is_terminated()).await;
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("user_id", &self.user_id)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Starts [`Watcher`]s against the Coinbase Pro feed.
#[derive(Clone)]
pub struct CoinbaseWatcherFactory {
    context: WatcherContext,
}

impl CoinbaseWatcherFactory {
    /// Create a factory sharing `context` across watchers.
    #[must_use]
    pub const fn new(context: WatcherContext) -> Self {
        Self { context }
    }
}

impl WatcherFactory for CoinbaseWatcherFactory {
    fn spawn(
        &self,
        credential: UserCredential,
        predecessor: Option<Box<dyn WatcherHandle>>,
    ) -> Box<dyn WatcherHandle> {
        let watcher = Watcher::new(credential, self.context.clone());
        watcher.start_after(predecessor);
        Box::new(watcher)
    }
}

// =============================================================================
// Session (task state)
// =============================================================================

/// Everything the run task owns.
struct Session {
    credential: UserCredential,
    signer: RequestSigner,
    context: WatcherContext,
    codec: JsonCodec,
    cancel: CancellationToken,
    status_tx: watch::Sender<WatcherStatus>,
}

impl Session {
    fn config(&self) -> &WatcherConfig {
        &self.context.config
    }

    /// Move to `next` unless already terminated.
    fn set_status(&self, next: WatcherStatus) {
        self.status_tx.send_if_modified(|current| {
            if current.is_terminated() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    async fn run(self, predecessor: Option<Box<dyn WatcherHandle>>) {
        let user_id = self.credential.id;

        if let Some(previous) = predecessor {
            tokio::select! {
                () = self.cancel.cancelled() => {}
                () = previous.stopped() => {}
            }
        }

        let (event_tx, event_rx) = mpsc::channel(self.config().queue_capacity.max(1));
        let drain = tokio::spawn(drain_notifications(
            user_id,
            event_rx,
            Arc::clone(&self.context.sink),
            self.cancel.clone(),
        ));

        tracing::info!(user_id = %user_id, "Watcher started");
        self.reconnect_loop(&event_tx).await;

        self.cancel.cancel();
        drop(event_tx);
        if let Err(e) = drain.await {
            tracing::warn!(user_id = %user_id, error = %e, "Notification drain task ended abnormally");
        }

        self.status_tx.send_replace(WatcherStatus::Terminated);
        tracing::info!(user_id = %user_id, "Watcher stopped");
    }

    async fn reconnect_loop(&self, event_tx: &mpsc::Sender<NotificationEvent>) {
        let user_id = self.credential.id;
        let mut policy = ReconnectPolicy::new(self.config().reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let error = match self.connect_and_run(&mut policy, event_tx).await {
                Ok(()) => return,
                Err(e) => e,
            };
            if self.cancel.is_cancelled() {
                return;
            }

            tracing::warn!(user_id = %user_id, error = %error, "Watcher connection failed");
            metrics::record_connection_error(error.kind());

            let Some(delay) = policy.next_delay() else {
                self.halt_after_retries(policy.max_attempts()).await;
                return;
            };

            let attempt = policy.attempt_count();
            self.set_status(WatcherStatus::Reconnecting { attempt });
            metrics::record_reconnect();
            tracing::info!(
                user_id = %user_id,
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to user feed"
            );

            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn halt_after_retries(&self, attempts: u32) {
        tracing::error!(
            user_id = %self.credential.id,
            attempts,
            "Reconnection attempts exhausted, watcher halted"
        );
        metrics::record_watcher_terminated();

        let alert = format!(
            "Max websocket connection retries reached!\nStopping watcher for {}. Manual intervention required for restart",
            self.credential.label()
        );
        if let Err(e) = self.context.sink.send_to_admin(&alert).await {
            tracing::warn!(error = %e, "Failed to deliver retry exhaustion alert");
        }
    }

    /// Connect, subscribe and read until failure. `Ok` means cancelled.
    async fn connect_and_run(
        &self,
        policy: &mut ReconnectPolicy,
        event_tx: &mpsc::Sender<NotificationEvent>,
    ) -> Result<(), WatcherError> {
        let config = self.config();
        let user_id = self.credential.id;

        tracing::debug!(user_id = %user_id, url = %config.url, "Connecting to user feed");

        let connect = async {
            let handshake = tokio_tungstenite::connect_async(config.url.as_str());
            match config.connect_timeout {
                Some(limit) => match tokio::time::timeout(limit, handshake).await {
                    Ok(result) => result.map_err(WatcherError::Connect),
                    Err(_) => Err(WatcherError::ConnectTimeout(limit)),
                },
                None => handshake.await.map_err(WatcherError::Connect),
            }
        };

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = connect => result?,
        };
        let (mut write, mut read) = ws_stream.split();

        self.subscribe(&mut write).await?;
        self.set_status(WatcherStatus::Running);

        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(4);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(config.heartbeat.clone(), heartbeat_tx, heartbeat_cancel).run(),
        );

        let mut deadline = ReadDeadline::new(config.heartbeat.read_timeout);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = send_with_timeout(&mut write, Message::Close(None), config.write_timeout).await;
                    return Ok(());
                }
                () = deadline.expired() => {
                    return Err(WatcherError::ReadTimeout(deadline.timeout()));
                }
                Some(HeartbeatEvent::SendPing) = heartbeat_rx.recv() => {
                    send_with_timeout(&mut write, Message::Ping(Vec::<u8>::new().into()), config.write_timeout).await?;
                }
                frame = read.next() => {
                    deadline.extend();
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text, policy, event_tx).await;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            if let Ok(text) = std::str::from_utf8(&data) {
                                self.handle_text(text, policy, event_tx).await;
                            } else {
                                tracing::warn!(user_id = %user_id, len = data.len(), "Received non-UTF8 binary frame");
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            send_with_timeout(&mut write, Message::Pong(data), config.write_timeout).await?;
                        }
                        Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(user_id = %user_id, frame = ?frame, "Server sent close frame");
                            return Err(WatcherError::ConnectionClosed);
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(WatcherError::ConnectionClosed),
                    }
                }
            }
        }
    }

    /// Sign and send the `user` channel subscription for the current catalog.
    async fn subscribe<S>(&self, write: &mut S) -> Result<(), WatcherError>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let product_ids = self.context.catalog.product_ids().to_vec();
        if product_ids.is_empty() {
            tracing::warn!(user_id = %self.credential.id, "Subscribing with an empty product catalog");
        }

        let request = self
            .signer
            .subscribe_request(product_ids, chrono::Utc::now().timestamp())?;
        let json = self.codec.encode_subscribe(&request)?;

        send_with_timeout(write, Message::Text(json.into()), self.config().write_timeout).await?;
        tracing::debug!(
            user_id = %self.credential.id,
            products = request.channels.first().map_or(0, |c| c.product_ids.len()),
            "Subscription sent"
        );
        Ok(())
    }

    async fn handle_text(
        &self,
        text: &str,
        policy: &mut ReconnectPolicy,
        event_tx: &mpsc::Sender<NotificationEvent>,
    ) {
        let user_id = self.credential.id;

        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                metrics::record_decode_error();
                tracing::warn!(user_id = %user_id, error = %e, raw = %text, "Dropping undecodable frame");
                return;
            }
        };
        metrics::record_frame_received(message.kind());

        match message {
            StreamMessage::Order(kind, order) => {
                tracing::debug!(
                    user_id = %user_id,
                    kind = kind.as_str(),
                    product_id = %order.product_id,
                    "Order event received"
                );
                let event = order.to_event(kind);
                tokio::select! {
                    () = self.cancel.cancelled() => {}
                    result = event_tx.send(event) => {
                        if result.is_err() {
                            tracing::debug!(user_id = %user_id, "Notification queue closed");
                        }
                    }
                }
            }
            StreamMessage::Error(error) => self.handle_error(&error).await,
            StreamMessage::Subscriptions(ack) => {
                policy.reset();
                tracing::info!(
                    user_id = %user_id,
                    channels = ?ack.channels.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                    "Subscription acknowledged"
                );
            }
            StreamMessage::Status(status) => {
                tracing::debug!(user_id = %user_id, products = status.products.len(), "Status received");
            }
            StreamMessage::Heartbeat(heartbeat) => {
                tracing::trace!(user_id = %user_id, product_id = %heartbeat.product_id, "Heartbeat received");
            }
            StreamMessage::Unknown { kind, raw } => {
                tracing::info!(user_id = %user_id, kind = %kind, raw = %raw, "Ignoring unrecognised frame");
            }
        }
    }

    async fn handle_error(&self, error: &ErrorMessage) {
        let user_id = self.credential.id;
        tracing::error!(user_id = %user_id, error = %error.describe(), "Feed reported an error");

        if error.is_authentication_failure()
            && let Err(e) = self
                .context
                .sink
                .send_to_user(user_id, AUTH_FAILED_USER_MESSAGE)
                .await
        {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to notify user about authentication failure");
        }

        let admin_text = format!(
            "Received an error message for user {}\nErrorMessage: {}",
            self.credential.label(),
            error.describe()
        );
        if let Err(e) = self.context.sink.send_to_admin(&admin_text).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to forward feed error to admin");
        }
    }
}

/// Send one frame, failing if it takes longer than `timeout`.
async fn send_with_timeout<S>(
    write: &mut S,
    message: Message,
    timeout: Duration,
) -> Result<(), WatcherError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    tokio::time::timeout(timeout, write.send(message))
        .await
        .map_err(|_| WatcherError::WriteTimeout(timeout))?
        .map_err(WatcherError::WebSocket)
}

// =============================================================================
// Drain Task
// =============================================================================

/// Deliver queued events in order until cancelled or the queue closes.
async fn drain_notifications(
    user_id: UserId,
    mut events: mpsc::Receiver<NotificationEvent>,
    sink: Arc<dyn NotificationSink>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let text = event.render();
        if text.is_empty() {
            tracing::info!(
                user_id = %user_id,
                kind = event.kind.as_str(),
                reason = ?event.reason,
                "No notification for order event"
            );
            continue;
        }

        let started = Instant::now();
        tokio::select! {
            () = cancel.cancelled() => break,
            result = sink.send_to_user(user_id, &text) => {
                metrics::record_notification(result.is_ok(), started.elapsed());
                match result {
                    Ok(()) => tracing::debug!(user_id = %user_id, order_id = %event.order_id, "Notification delivered"),
                    Err(e) => tracing::warn!(user_id = %user_id, error = %e, "Notification delivery failed"),
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
