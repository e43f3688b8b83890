//! Product Catalog
//!
//! Shared, periodically refreshed list of tradable product ids. Every watcher
//! reads it when it (re)subscribes; a single background task writes it.
//!
//! The snapshot is an `Arc<[String]>` swapped under a short write lock, so
//! readers only ever clone a pointer and never wait on the network.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{CatalogError, ProductSource};
use crate::infrastructure::metrics;

/// Default refresh interval (6 hours).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Shared product-id catalog with a background refresh task.
pub struct ProductCatalog {
    source: Arc<dyn ProductSource>,
    refresh_interval: Duration,
    snapshot: RwLock<Arc<[String]>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProductCatalog {
    /// Create an empty catalog backed by `source`.
    #[must_use]
    pub fn new(source: Arc<dyn ProductSource>, refresh_interval: Duration) -> Self {
        Self {
            source,
            refresh_interval,
            snapshot: RwLock::new(Arc::from(Vec::new())),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Latest snapshot of product ids, sorted and deduplicated.
    #[must_use]
    pub fn product_ids(&self) -> Arc<[String]> {
        self.snapshot.read().clone()
    }

    /// Number of products in the current snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    /// Whether the current snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }

    /// Fetch once and swap the snapshot. The previous snapshot is kept on error.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the fetch fails or yields no products.
    pub async fn refresh(&self) -> Result<usize, CatalogError> {
        let mut ids = match self.source.fetch_product_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                metrics::record_catalog_refresh(false);
                return Err(e);
            }
        };

        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            metrics::record_catalog_refresh(false);
            return Err(CatalogError::Empty);
        }

        let count = ids.len();
        let next: Arc<[String]> = Arc::from(ids);
        *self.snapshot.write() = next;

        metrics::record_catalog_refresh(true);
        metrics::set_catalog_products(count);
        Ok(count)
    }

    /// Load the catalog once, then refresh every `refresh_interval` in the
    /// background until [`stop`](Self::stop). Calling `start` on a running
    /// catalog does nothing.
    pub async fn start(self: &Arc<Self>) {
        if self.task.lock().is_some() || self.cancel.is_cancelled() {
            tracing::warn!("Product catalog already started or stopped");
            return;
        }

        match self.refresh().await {
            Ok(count) => tracing::info!(count, "Product catalog loaded"),
            Err(e) => tracing::warn!(error = %e, "Initial product catalog load failed"),
        }

        let catalog = Arc::clone(self);
        let handle = tokio::spawn(async move { catalog.refresh_loop().await });

        let mut task = self.task.lock();
        if task.is_some() {
            handle.abort();
        } else {
            *task = Some(handle);
        }
    }

    /// Stop the refresh task. Safe to call more than once.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Product catalog task ended abnormally");
            }
            tracing::info!("Product catalog stopped");
        }
    }

    async fn refresh_loop(&self) {
        let period = self.refresh_interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.refresh().await {
                        Ok(count) => tracing::info!(count, "Product catalog refreshed"),
                        Err(e) => tracing::warn!(
                            error = %e,
                            kept = self.len(),
                            "Product catalog refresh failed, keeping previous snapshot"
                        ),
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for ProductCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductCatalog")
            .field("refresh_interval", &self.refresh_interval)
            .field("products", &self.len())
            .field("stopped", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
