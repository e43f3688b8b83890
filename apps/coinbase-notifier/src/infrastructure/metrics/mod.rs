//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Counts of feed frames received by type, and decode failures
//! - **Notifications**: Delivery outcomes and latency
//! - **Watchers**: Active watcher count, reconnects, terminations
//! - **Catalog**: Product count and refresh outcomes
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Until
//! [`init_metrics`] is called every recording function is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns `BuildError` if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "coinbase_notifier_frames_received_total",
        "Total frames received from user feeds, by frame type"
    );
    describe_counter!(
        "coinbase_notifier_decode_errors_total",
        "Total frames dropped because they could not be decoded"
    );
    describe_counter!(
        "coinbase_notifier_notifications_sent_total",
        "Total notifications handed to the chat sink, by result"
    );
    describe_histogram!(
        "coinbase_notifier_notification_delivery_seconds",
        "Time to deliver one notification to the chat sink"
    );

    describe_gauge!(
        "coinbase_notifier_active_watchers",
        "Number of watchers registered in the registry"
    );
    describe_counter!(
        "coinbase_notifier_connection_errors_total",
        "Total watcher connection failures, by error type"
    );
    describe_counter!(
        "coinbase_notifier_reconnects_total",
        "Total watcher reconnection attempts"
    );
    describe_counter!(
        "coinbase_notifier_watchers_terminated_total",
        "Total watchers halted after exhausting reconnection attempts"
    );

    describe_gauge!(
        "coinbase_notifier_catalog_products",
        "Number of products in the current catalog snapshot"
    );
    describe_counter!(
        "coinbase_notifier_catalog_refresh_total",
        "Total catalog refreshes, by result"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

const fn result_label(ok: bool) -> &'static str {
    if ok { "ok" } else { "error" }
}

/// Record a frame received on a user feed.
pub fn record_frame_received(kind: &'static str) {
    counter!("coinbase_notifier_frames_received_total", "kind" => kind).increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error() {
    counter!("coinbase_notifier_decode_errors_total").increment(1);
}

/// Record a notification delivery attempt.
pub fn record_notification(ok: bool, duration: Duration) {
    counter!(
        "coinbase_notifier_notifications_sent_total",
        "result" => result_label(ok)
    )
    .increment(1);
    histogram!("coinbase_notifier_notification_delivery_seconds").record(duration.as_secs_f64());
}

/// Update the registered watcher count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_watchers(count: usize) {
    gauge!("coinbase_notifier_active_watchers").set(count as f64);
}

/// Record a watcher connection failure.
pub fn record_connection_error(error_type: &'static str) {
    counter!(
        "coinbase_notifier_connection_errors_total",
        "error_type" => error_type
    )
    .increment(1);
}

/// Record a watcher reconnection attempt.
pub fn record_reconnect() {
    counter!("coinbase_notifier_reconnects_total").increment(1);
}

/// Record a watcher halted after exhausting its retries.
pub fn record_watcher_terminated() {
    counter!("coinbase_notifier_watchers_terminated_total").increment(1);
}

/// Update the catalog product count.
#[allow(clippy::cast_precision_loss)]
pub fn set_catalog_products(count: usize) {
    gauge!("coinbase_notifier_catalog_products").set(count as f64);
}

/// Record a catalog refresh outcome.
pub fn record_catalog_refresh(ok: bool) {
    counter!(
        "coinbase_notifier_catalog_refresh_total",
        "result" => result_label(ok)
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
