//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, watcher status reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (product catalog loaded)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ProductCatalog, RegistryStats, WatcherRegistry};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Watcher counts by status.
    pub watchers: RegistryStats,
    /// Configured user cap.
    pub max_users: usize,
    /// Products in the current catalog snapshot.
    pub catalog_products: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Some watchers are reconnecting or halted.
    Degraded,
    /// No product catalog, so no subscription can succeed.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    registry: Arc<WatcherRegistry>,
    catalog: Arc<ProductCatalog>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        registry: Arc<WatcherRegistry>,
        catalog: Arc<ProductCatalog>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
            catalog,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by [`HealthServer`].
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state).await;
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.catalog.is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let watchers = state.registry.stats().await;
    let catalog_products = state.catalog.len();

    HealthResponse {
        status: determine_health_status(catalog_products, &watchers),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        watchers,
        max_users: state.registry.max_users(),
        catalog_products,
    }
}

const fn determine_health_status(catalog_products: usize, watchers: &RegistryStats) -> HealthStatus {
    if catalog_products == 0 {
        HealthStatus::Unhealthy
    } else if watchers.reconnecting > 0 || watchers.terminated > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{
        MockNotificationSink, MockProductSource, WatcherFactory, WatcherHandle,
    };
    use crate::application::services::{DEFAULT_REFRESH_INTERVAL, RegistryConfig};
    use crate::domain::credentials::UserCredential;
    use crate::infrastructure::persistence::InMemoryCredentialRepository;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    struct NoWatchers;

    impl WatcherFactory for NoWatchers {
        fn spawn(
            &self,
            _credential: UserCredential,
            _predecessor: Option<Box<dyn WatcherHandle>>,
        ) -> Box<dyn WatcherHandle> {
            unreachable!("no watchers are started in health tests")
        }
    }

    async fn state(products: Vec<&'static str>) -> Arc<HealthServerState> {
        let mut source = MockProductSource::new();
        let ids: Vec<String> = products.into_iter().map(String::from).collect();
        source
            .expect_fetch_product_ids()
            .returning(move || Ok(ids.clone()));

        let catalog = Arc::new(ProductCatalog::new(
            Arc::new(source),
            DEFAULT_REFRESH_INTERVAL,
        ));
        let _ = catalog.refresh().await;

        let registry = Arc::new(WatcherRegistry::new(
            Arc::new(InMemoryCredentialRepository::new()),
            Arc::new(NoWatchers),
            Arc::new(MockNotificationSink::new()),
            RegistryConfig::default(),
        ));

        Arc::new(HealthServerState::new("0.1.0".to_string(), registry, catalog))
    }

    async fn fetch(state: Arc<HealthServerState>, uri: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn status_rules() {
        let idle = RegistryStats::default();
        assert_eq!(determine_health_status(0, &idle), HealthStatus::Unhealthy);
        assert_eq!(determine_health_status(3, &idle), HealthStatus::Healthy);

        let halted = RegistryStats {
            total: 1,
            terminated: 1,
            ..RegistryStats::default()
        };
        assert_eq!(determine_health_status(3, &halted), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (status, body) = fetch(state(vec![]).await, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn readiness_follows_catalog() {
        let (status, _) = fetch(state(vec![]).await, "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = fetch(state(vec!["BTC-EUR"]).await, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "READY");
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let (status, body) = fetch(state(vec!["BTC-EUR", "ETH-EUR"]).await, "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["catalog_products"], 2);
        assert_eq!(json["max_users"], 25);
        assert_eq!(json["watchers"]["total"], 0);
    }
}
