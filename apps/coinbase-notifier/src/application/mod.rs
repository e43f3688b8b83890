//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (notifications, products, watchers).
pub mod ports;

/// Application services for the product catalog and watcher registry.
pub mod services;
