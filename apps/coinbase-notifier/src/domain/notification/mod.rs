//! Order Notifications
//!
//! Classification and rendering of order lifecycle events into the text
//! delivered to a user's chat. Rendering is pure: unmapped combinations of
//! event type and reason render to an empty string instead of failing.

use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Go-style RFC 822 layout (`02 Jan 06 15:04 UTC`).
const TIME_FORMAT: &str = "%d %b %y %H:%M %Z";

// =============================================================================
// Event Types
// =============================================================================

/// Order lifecycle frame types on the user channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderEventKind {
    /// Order accepted by the matching engine.
    Received,
    /// Order resting on the book.
    Open,
    /// Order no longer on the book.
    Done,
    /// Trade between two orders.
    Match,
    /// Order size or funds changed.
    Change,
    /// Stop order activated.
    Activate,
}

impl OrderEventKind {
    /// Wire name of the frame type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Open => "open",
            Self::Done => "done",
            Self::Match => "match",
            Self::Change => "change",
            Self::Activate => "activate",
        }
    }
}

/// Why an order left the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoneReason {
    /// Completely or partially filled.
    Filled,
    /// Canceled by the user or the venue.
    Canceled,
    /// Any other reason string.
    Other(String),
}

impl DoneReason {
    /// Parse a wire reason.
    #[must_use]
    pub fn parse(reason: &str) -> Self {
        match reason {
            "filled" => Self::Filled,
            "canceled" => Self::Canceled,
            other => Self::Other(other.to_string()),
        }
    }
}

// =============================================================================
// Notification Event
// =============================================================================

/// A single order lifecycle change queued for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// Frame type.
    pub kind: OrderEventKind,
    /// Venue timestamp.
    pub time: Option<DateTime<Utc>>,
    /// Venue order id.
    pub order_id: String,
    /// Instrument identifier, e.g. `BTC-EUR`.
    pub product_id: String,
    /// `buy` or `sell`.
    pub side: String,
    /// `limit`, `market` or `stop`.
    pub order_type: String,
    /// Limit price, empty for market orders.
    pub price: String,
    /// Size not yet filled.
    pub remaining_size: String,
    /// Completion reason, only present on `done`.
    pub reason: Option<DoneReason>,
}

impl NotificationEvent {
    /// Create an event with empty order fields.
    #[must_use]
    pub const fn new(kind: OrderEventKind) -> Self {
        Self {
            kind,
            time: None,
            order_id: String::new(),
            product_id: String::new(),
            side: String::new(),
            order_type: String::new(),
            price: String::new(),
            remaining_size: String::new(),
            reason: None,
        }
    }

    /// Decide which message, if any, this event maps to.
    #[must_use]
    pub fn classify(&self) -> Classification {
        match (self.kind, &self.reason) {
            (OrderEventKind::Open, _) => Classification::Placed,
            // Market orders finish without a remaining size.
            (OrderEventKind::Done, Some(DoneReason::Filled))
                if self.remaining_size.trim().is_empty() =>
            {
                Classification::Filled
            }
            (OrderEventKind::Done, Some(DoneReason::Filled)) => {
                match is_zero_size(&self.remaining_size) {
                    Some(true) => Classification::Filled,
                    Some(false) => Classification::PartiallyFilled,
                    None => Classification::Unmapped,
                }
            }
            (OrderEventKind::Done, Some(DoneReason::Canceled)) => Classification::Canceled,
            _ => Classification::Unmapped,
        }
    }

    /// Render the chat message. Unmapped events render to an empty string.
    #[must_use]
    pub fn render(&self) -> String {
        let classification = self.classify();
        let Some(title) = classification.title() else {
            return String::new();
        };

        let mut text = String::from(title);
        let mut line = |label: &str, value: &str| {
            let _ = write!(text, "\n{label}: {value}");
        };

        line("Time", &self.formatted_time());
        line("Side", &self.side);
        line("OrderID", &self.order_id);

        match classification {
            Classification::Placed => {
                line("OrderType", &self.order_type);
                line("ProductID", &self.product_id);
                line("Size", &self.remaining_size);
            }
            Classification::Filled => {
                line("OrderType", &self.order_type);
                line("Product ID", &self.product_id);
            }
            Classification::PartiallyFilled => {
                line("OrderType", &self.order_type);
                line("ProductID", &self.product_id);
                line("Remaining Size", &self.remaining_size);
            }
            Classification::Canceled => {
                line("ProductID", &self.product_id);
                line("Size", &self.remaining_size);
            }
            Classification::Unmapped => {}
        }
        line("Price", &self.price);

        text
    }

    fn formatted_time(&self) -> String {
        self.time
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_default()
    }
}

/// Message category chosen for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Order placed on the book.
    Placed,
    /// Order completely filled.
    Filled,
    /// Order filled with size remaining.
    PartiallyFilled,
    /// Order canceled.
    Canceled,
    /// No message for this event.
    Unmapped,
}

impl Classification {
    const fn title(self) -> Option<&'static str> {
        match self {
            Self::Placed => Some("Order was successfully placed!"),
            Self::Filled => Some("Order was filled!"),
            Self::PartiallyFilled => Some("Order was partially filled!"),
            Self::Canceled => Some("Order was canceled!"),
            Self::Unmapped => None,
        }
    }
}

/// `Some(true)` when `size` parses to a numeric zero, `None` when it does not parse.
fn is_zero_size(size: &str) -> Option<bool> {
    Decimal::from_str(size.trim()).ok().map(|d| d.is_zero())
}

// =============================================================================
// Tests
// =============================================================================
