//! Coinbase Pro Adapters
//!
//! Implements the per-user order feed and the product catalog source:
//!
//! - **Watcher**: Authenticated `user` channel subscription (JSON codec)
//! - **Products**: REST product listing for the catalog

pub mod auth;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod products;
pub mod reconnect;
pub mod watcher;

pub use auth::{AuthError, RequestSigner};
pub use codec::{CodecError, JsonCodec};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, ReadDeadline};
pub use messages::*;
pub use products::{CoinbaseProductsClient, DEFAULT_REST_URL};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use watcher::{
    CoinbaseWatcherFactory, DEFAULT_WEBSOCKET_URL, Watcher, WatcherConfig, WatcherContext,
    WatcherError,
};
