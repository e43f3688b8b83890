//! Coinbase Pro WebSocket Message Types
//!
//! Wire types for the WebSocket feed at `wss://ws-feed.pro.coinbase.com`.
//! Every frame is a single JSON object discriminated by its `type` field.
//!
//! # Message Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | `received`, `open`, `done`, `match`, `change`, `activate` | Order lifecycle on the `user` channel |
//! | `subscriptions` | Acknowledges a subscribe request |
//! | `error` | Request rejected (bad signature, unknown product, ...) |
//! | `status` | Product and currency status |
//! | `heartbeat` | Per-product liveness ticks |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::notification::{DoneReason, NotificationEvent, OrderEventKind};

// =============================================================================
// Decoded Frame
// =============================================================================

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Order lifecycle event.
    Order(OrderEventKind, Box<OrderMessage>),
    /// Error reported by the venue.
    Error(ErrorMessage),
    /// Subscription acknowledgement.
    Subscriptions(SubscriptionsMessage),
    /// Product status snapshot.
    Status(StatusMessage),
    /// Heartbeat tick.
    Heartbeat(HeartbeatMessage),
    /// Frame with a `type` this client does not handle.
    Unknown {
        /// Value of the `type` field.
        kind: String,
        /// Raw frame text.
        raw: String,
    },
}

impl StreamMessage {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Order(kind, _) => kind.as_str(),
            Self::Error(_) => "error",
            Self::Subscriptions(_) => "subscriptions",
            Self::Status(_) => "status",
            Self::Heartbeat(_) => "heartbeat",
            Self::Unknown { .. } => "unknown",
        }
    }
}

// =============================================================================
// Order Lifecycle
// =============================================================================

/// Fields shared by the order lifecycle frames.
///
/// Which fields are present depends on the frame type and order type, so
/// everything except the product is optional.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderMessage {
    /// Venue timestamp.
    pub time: Option<DateTime<Utc>>,
    /// Instrument identifier.
    #[serde(default)]
    pub product_id: String,
    /// Feed sequence number.
    pub sequence: Option<u64>,
    /// Order id (absent on `match`).
    pub order_id: Option<String>,
    /// Resting order id on `match`.
    pub maker_order_id: Option<String>,
    /// Incoming order id on `match`.
    pub taker_order_id: Option<String>,
    /// Trade id on `match`.
    pub trade_id: Option<u64>,
    /// `buy` or `sell`.
    #[serde(default)]
    pub side: String,
    /// `limit`, `market` or `stop`.
    pub order_type: Option<String>,
    /// Order or trade price.
    pub price: Option<String>,
    /// Order or trade size.
    pub size: Option<String>,
    /// Size not yet filled.
    pub remaining_size: Option<String>,
    /// Quote funds for market orders.
    pub funds: Option<String>,
    /// Completion reason on `done`.
    pub reason: Option<String>,
    /// New size on `change`.
    pub new_size: Option<String>,
    /// Previous size on `change`.
    pub old_size: Option<String>,
    /// Owning user id.
    pub user_id: Option<String>,
    /// Owning profile id.
    pub profile_id: Option<String>,
}

impl OrderMessage {
    /// Convert to the domain event queued for delivery.
    #[must_use]
    pub fn to_event(&self, kind: OrderEventKind) -> NotificationEvent {
        let order_id = self
            .order_id
            .as_ref()
            .or(self.taker_order_id.as_ref())
            .or(self.maker_order_id.as_ref())
            .cloned()
            .unwrap_or_default();

        let remaining_size = self
            .remaining_size
            .as_ref()
            .or(self.size.as_ref())
            .cloned()
            .unwrap_or_default();

        NotificationEvent {
            kind,
            time: self.time,
            order_id,
            product_id: self.product_id.clone(),
            side: self.side.clone(),
            order_type: self.order_type.clone().unwrap_or_default(),
            price: self.price.clone().unwrap_or_default(),
            remaining_size,
            reason: self.reason.as_deref().map(DoneReason::parse),
        }
    }
}

// =============================================================================
// Control Messages
// =============================================================================

/// Error frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Human-readable error.
    #[serde(default)]
    pub message: String,
    /// Additional detail.
    pub reason: Option<String>,
}

impl ErrorMessage {
    /// Whether the venue rejected the subscribe signature or API key.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        self.message
            .to_ascii_lowercase()
            .contains("authentication failed")
    }

    /// `message` followed by `reason` when present.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.reason {
            Some(reason) if !reason.is_empty() => format!("{} ({reason})", self.message),
            _ => self.message.clone(),
        }
    }
}

/// Subscription acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriptionsMessage {
    /// Channels now subscribed.
    #[serde(default)]
    pub channels: Vec<Channel>,
}

/// Product status snapshot. Only the product count is used.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Product entries.
    #[serde(default)]
    pub products: Vec<serde_json::Value>,
}

/// Heartbeat tick.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    /// Feed sequence number.
    pub sequence: Option<u64>,
    /// Last trade id for the product.
    pub last_trade_id: Option<u64>,
    /// Instrument identifier.
    #[serde(default)]
    pub product_id: String,
    /// Venue timestamp.
    pub time: Option<DateTime<Utc>>,
}

// =============================================================================
// Outbound Messages
// =============================================================================

/// Channel entry in subscribe requests and acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Channel {
    /// Channel name.
    pub name: String,
    /// Products the channel is scoped to.
    #[serde(default)]
    pub product_ids: Vec<String>,
}

/// Signed subscribe envelope.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Always `subscribe`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Requested channels.
    pub channels: Vec<Channel>,
    /// API key.
    pub key: String,
    /// API passphrase.
    pub passphrase: String,
    /// Unix seconds used in the signature.
    pub timestamp: String,
    /// Base64 HMAC-SHA256 signature.
    pub signature: String,
}

impl std::fmt::Debug for SubscribeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeRequest")
            .field("kind", &self.kind)
            .field("channels", &self.channels)
            .field("key", &self.key)
            .field("passphrase", &"[REDACTED]")
            .field("timestamp", &self.timestamp)
            .field("signature", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
