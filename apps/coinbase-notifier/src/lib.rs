#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Coinbase Notifier - Per-User Order Update Watcher
//!
//! Keeps one authenticated Coinbase Pro `user` channel subscription per
//! registered user and turns their order lifecycle changes into Telegram
//! messages.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `credentials`: User credentials, summaries, repository port
//!   - `notification`: Order event classification and message rendering
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Notification sink, product source, watcher factory
//!   - `services`: Product catalog, watcher registry
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `coinbase`: Per-user WebSocket watcher, REST product client
//!   - `telegram`: Bot API notification sink
//!   - `persistence`: JSON file and in-memory credential stores
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                      ┌──────────────┐
//! Coinbase user WS ───►│  Watcher(A)  │──► queue ──► drain ──► Telegram chat A
//! Coinbase user WS ───►│  Watcher(B)  │──► queue ──► drain ──► Telegram chat B
//!                      └──────▲───────┘
//!                             │ enable / disable / delete
//!                      ┌──────┴───────┐
//!   bot & web flows ──►│   Registry   │◄── credential store
//!                      └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Credentials and notification rendering with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::credentials::{
    CredentialRepository, CredentialSummary, RepositoryError, UserCredential, UserId,
};
pub use domain::notification::{Classification, DoneReason, NotificationEvent, OrderEventKind};

// Ports
pub use application::ports::{
    CatalogError, NotificationSink, ProductSource, SinkError, WatcherFactory, WatcherHandle,
    WatcherStatus,
};

// Services
pub use application::services::{
    ProductCatalog, RegistryConfig, RegistryError, RegistryStats, WatcherRegistry,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, NotifierConfig};

// Watcher (for integration tests)
pub use infrastructure::coinbase::{
    CoinbaseWatcherFactory, ReconnectConfig, Watcher, WatcherConfig, WatcherContext,
};

// Adapters
pub use infrastructure::persistence::{InMemoryCredentialRepository, JsonFileCredentialRepository};
pub use infrastructure::telegram::TelegramSink;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
