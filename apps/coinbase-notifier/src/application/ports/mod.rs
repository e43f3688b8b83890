//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `NotificationSink`: Delivers rendered text to a user or the admin chat
//! - `ProductSource`: Fetches the tradable product list from the venue
//! - `WatcherFactory`: Starts a per-user order watcher
//!
//! ## Lifecycle Handles
//!
//! - `WatcherHandle`: Stop and observe a running watcher
//!
//! The credential repository port lives in the domain layer next to the
//! type it stores.

use async_trait::async_trait;

use crate::domain::credentials::{UserCredential, UserId};

// =============================================================================
// Notification Sink
// =============================================================================

/// Errors raised while delivering a notification.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Transport failure.
    #[error("notification transport failed: {0}")]
    Transport(String),

    /// Destination rejected the message.
    #[error("notification rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// No admin chat is configured.
    #[error("admin chat is not configured")]
    AdminNotConfigured,
}

/// Destination for rendered notification text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver text to a user's chat.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if delivery fails.
    async fn send_to_user(&self, user: UserId, text: &str) -> Result<(), SinkError>;

    /// Deliver text to the administrative chat.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if delivery fails or no admin chat is configured.
    async fn send_to_admin(&self, text: &str) -> Result<(), SinkError>;
}

// =============================================================================
// Product Source
// =============================================================================

/// Errors raised while fetching the product catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Transport failure.
    #[error("product request failed: {0}")]
    Http(String),

    /// Non-success HTTP status.
    #[error("product request returned status {0}")]
    Status(u16),

    /// Response body was not a product list.
    #[error("failed to decode product list: {0}")]
    Decode(String),

    /// The venue returned no products.
    #[error("product list is empty")]
    Empty,
}

/// Source of tradable product identifiers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductSource: Send + Sync {
    /// Fetch every product id currently listed.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the request or decoding fails.
    async fn fetch_product_ids(&self) -> Result<Vec<String>, CatalogError>;
}

// =============================================================================
// Watchers
// =============================================================================

/// Observable lifecycle of a watcher.
///
/// Transitions only move forward: `Created` → `Running` →
/// (`Reconnecting` ↔ `Running`)* → `Terminated`. Nothing follows `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStatus {
    /// Constructed, no connection attempted yet.
    Created,
    /// Connected and subscribed.
    Running,
    /// Waiting for or performing a reconnect.
    Reconnecting {
        /// Retry number since the last acknowledged subscription.
        attempt: u32,
    },
    /// Stopped for good.
    Terminated,
}

impl WatcherStatus {
    /// Whether the watcher has stopped for good.
    #[must_use]
    pub const fn is_terminated(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Status name for health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Terminated => "terminated",
        }
    }
}

/// Control surface of a started watcher.
#[async_trait]
pub trait WatcherHandle: Send + Sync {
    /// User the watcher belongs to.
    fn user_id(&self) -> UserId;

    /// Current lifecycle status.
    fn status(&self) -> WatcherStatus;

    /// Signal termination. Idempotent and non-blocking.
    fn stop(&self);

    /// Resolves once the watcher's tasks have exited and its connection is
    /// released.
    async fn stopped(&self);
}

/// Creates and starts watchers.
pub trait WatcherFactory: Send + Sync {
    /// Start a watcher for `credential`.
    ///
    /// When `predecessor` is given it is stopped, and the new watcher opens
    /// its connection only after the predecessor has fully stopped.
    fn spawn(
        &self,
        credential: UserCredential,
        predecessor: Option<Box<dyn WatcherHandle>>,
    ) -> Box<dyn WatcherHandle>;
}
