//! Coinbase Notifier Binary
//!
//! Starts one order watcher per active user and forwards their order
//! updates to Telegram.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin coinbase-notifier
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TELEGRAM_TOKEN`: Bot API token
//!
//! ## Optional
//! - `TELEGRAM_ADMIN_CHAT_ID`: Chat for operational alerts
//! - `COINBASE_PRO_WEBSOCKET_URL`: Feed URL (default: wss://ws-feed.pro.coinbase.com)
//! - `COINBASE_PRO_REST_URL`: REST URL (default: <https://api.pro.coinbase.com>)
//! - `COINBASE_PRO_CONNECT_TIMEOUT_SECS`: Handshake deadline (default: none)
//! - `NOTIFIER_MAX_USERS`: Concurrent watcher cap (default: 25)
//! - `NOTIFIER_RECONNECT_JITTER`: Backoff spread as a fraction (default: 0)
//! - `DATABASE_FILE`: Credential store (default: notifier-users.json, empty = memory)
//! - `NOTIFIER_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use coinbase_notifier::application::ports::{NotificationSink, ProductSource};
use coinbase_notifier::application::services::{ProductCatalog, WatcherRegistry};
use coinbase_notifier::domain::credentials::CredentialRepository;
use coinbase_notifier::infrastructure::coinbase::{
    CoinbaseProductsClient, CoinbaseWatcherFactory, WatcherContext,
};
use coinbase_notifier::infrastructure::health::{HealthServer, HealthServerState};
use coinbase_notifier::infrastructure::persistence::{
    InMemoryCredentialRepository, JsonFileCredentialRepository,
};
use coinbase_notifier::infrastructure::telegram::TelegramSink;
use coinbase_notifier::infrastructure::telemetry;
use coinbase_notifier::{NotifierConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Upper bound on watcher teardown at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Coinbase Notifier");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = NotifierConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Credential storage
    let repository: Arc<dyn CredentialRepository> = match &config.storage.database_file {
        Some(path) => Arc::new(
            JsonFileCredentialRepository::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => {
            tracing::warn!("DATABASE_FILE is empty, credentials are kept in memory only");
            Arc::new(InMemoryCredentialRepository::new())
        }
    };

    // Notification sink
    let sink: Arc<dyn NotificationSink> = Arc::new(TelegramSink::new(
        config.telegram.api_url.clone(),
        config.telegram.token(),
        config.telegram.admin_chat_id,
    )?);

    // Product catalog
    let products: Arc<dyn ProductSource> =
        Arc::new(CoinbaseProductsClient::new(config.coinbase.rest_url.clone())?);
    let catalog = Arc::new(ProductCatalog::new(
        products,
        config.notifier.catalog_refresh_interval,
    ));
    catalog.start().await;

    // Watchers
    let factory = Arc::new(CoinbaseWatcherFactory::new(WatcherContext::new(
        config.watcher_config(),
        Arc::clone(&catalog),
        Arc::clone(&sink),
    )));
    let registry = Arc::new(WatcherRegistry::new(
        repository,
        factory,
        sink,
        config.registry_config(),
    ));

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&registry),
        Arc::clone(&catalog),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Bulk startup is paced, so run it beside the signal wait.
    let startup_registry = Arc::clone(&registry);
    let startup_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = startup_cancel.cancelled() => {}
            result = startup_registry.start_all() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to load active users");
                }
            }
        }
    });

    tracing::info!("Coinbase Notifier ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, registry.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Watchers did not stop in time"
        );
    }
    catalog.stop().await;

    tracing::info!("Coinbase Notifier stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &NotifierConfig) {
    tracing::info!(
        websocket_url = %config.coinbase.websocket_url,
        rest_url = %config.coinbase.rest_url,
        max_users = config.notifier.max_users,
        health_port = config.server.health_port,
        admin_chat = config.telegram.admin_chat_id.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        ping_interval_secs = config.websocket.ping_interval.as_secs(),
        read_timeout_secs = config.websocket.read_timeout.as_secs(),
        connect_timeout_secs = config.websocket.connect_timeout.map(|d| d.as_secs()),
        max_reconnect_attempts = config.websocket.max_reconnect_attempts,
        "WebSocket settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    tracing::info!("Graceful shutdown started");
}
