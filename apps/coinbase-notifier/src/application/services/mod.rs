//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ProductCatalog`: Shared, periodically refreshed product id snapshot
//! - `WatcherRegistry`: Owns the watcher lifecycle for every user

pub mod catalog;
pub mod registry;

pub use catalog::{DEFAULT_REFRESH_INTERVAL, ProductCatalog};
pub use registry::{RegistryConfig, RegistryError, RegistryStats, WatcherRegistry};
