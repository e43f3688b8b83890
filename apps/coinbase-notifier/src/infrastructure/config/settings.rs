//! Notifier Configuration Settings
//!
//! Configuration types for the notifier, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::registry::{DEFAULT_MAX_USERS, DEFAULT_STARTUP_DELAY};
use crate::application::services::{DEFAULT_REFRESH_INTERVAL, RegistryConfig};
use crate::infrastructure::coinbase::{
    DEFAULT_REST_URL, DEFAULT_WEBSOCKET_URL, HeartbeatConfig, ReconnectConfig, WatcherConfig,
};
use crate::infrastructure::telegram::DEFAULT_API_URL;

/// Telegram Bot API settings.
#[derive(Clone)]
pub struct TelegramSettings {
    token: String,
    /// Chat receiving operational alerts. Admin messages are dropped when unset.
    pub admin_chat_id: Option<i64>,
    /// Bot API base URL.
    pub api_url: String,
}

impl TelegramSettings {
    /// Create settings for the bot identified by `token`.
    #[must_use]
    pub fn new(token: impl Into<String>, admin_chat_id: Option<i64>) -> Self {
        Self {
            token: token.into(),
            admin_chat_id,
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Get the bot token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("token", &"[REDACTED]")
            .field("admin_chat_id", &self.admin_chat_id)
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Coinbase Pro endpoints.
#[derive(Debug, Clone)]
pub struct CoinbaseSettings {
    /// Feed WebSocket URL.
    pub websocket_url: String,
    /// REST base URL for the product list.
    pub rest_url: String,
}

impl Default for CoinbaseSettings {
    fn default() -> Self {
        Self {
            websocket_url: DEFAULT_WEBSOCKET_URL.to_string(),
            rest_url: DEFAULT_REST_URL.to_string(),
        }
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Ping interval.
    pub ping_interval: Duration,
    /// Silence tolerated before the connection is considered dead.
    pub read_timeout: Duration,
    /// Deadline for each outbound frame.
    pub write_timeout: Duration,
    /// Handshake deadline. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Retries before a watcher halts (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Random spread applied to each backoff delay (0.1 = ±10%, 0 = none).
    pub reconnect_jitter: f64,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(45),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(3),
            connect_timeout: None,
            reconnect_delay_initial: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(512),
            max_reconnect_attempts: 10,
            reconnect_jitter: 0.0,
        }
    }
}

/// Watcher fleet settings.
#[derive(Debug, Clone)]
pub struct NotifierSettings {
    /// Per-user notification queue capacity.
    pub queue_capacity: usize,
    /// Maximum concurrently watched users.
    pub max_users: usize,
    /// Pause between watcher starts at boot.
    pub startup_delay: Duration,
    /// Product catalog refresh interval.
    pub catalog_refresh_interval: Duration,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            max_users: DEFAULT_MAX_USERS,
            startup_delay: DEFAULT_STARTUP_DELAY,
            catalog_refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

/// Credential storage settings.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// JSON document path. `None` keeps records in memory only.
    pub database_file: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_file: Some(PathBuf::from("notifier-users.json")),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete notifier configuration.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Telegram settings.
    pub telegram: TelegramSettings,
    /// Coinbase Pro endpoints.
    pub coinbase: CoinbaseSettings,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Watcher fleet settings.
    pub notifier: NotifierSettings,
    /// Credential storage settings.
    pub storage: StorageSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl NotifierConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required keys are missing or malformed.
    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = env("TELEGRAM_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("TELEGRAM_TOKEN".to_string()))?;
        if token.trim().is_empty() {
            return Err(ConfigError::EmptyValue("TELEGRAM_TOKEN".to_string()));
        }

        let admin_chat_id = match env("TELEGRAM_ADMIN_CHAT_ID").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(raw.trim().parse::<i64>().map_err(|_| ConfigError::InvalidValue {
                key: "TELEGRAM_ADMIN_CHAT_ID".to_string(),
                value: raw.clone(),
            })?),
            None => None,
        };

        let mut telegram = TelegramSettings::new(token, admin_chat_id);
        if let Some(url) = env("TELEGRAM_API_URL").filter(|v| !v.is_empty()) {
            telegram.api_url = url;
        }

        let coinbase_defaults = CoinbaseSettings::default();
        let coinbase = CoinbaseSettings {
            websocket_url: env("COINBASE_PRO_WEBSOCKET_URL")
                .filter(|v| !v.is_empty())
                .unwrap_or(coinbase_defaults.websocket_url),
            rest_url: env("COINBASE_PRO_REST_URL")
                .filter(|v| !v.is_empty())
                .unwrap_or(coinbase_defaults.rest_url),
        };

        let ws_defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            ping_interval: parse_env_duration_secs(
                &env,
                "COINBASE_PRO_PING_INTERVAL_SECS",
                ws_defaults.ping_interval,
            ),
            read_timeout: parse_env_duration_secs(
                &env,
                "COINBASE_PRO_READ_TIMEOUT_SECS",
                ws_defaults.read_timeout,
            ),
            write_timeout: parse_env_duration_secs(
                &env,
                "COINBASE_PRO_WRITE_TIMEOUT_SECS",
                ws_defaults.write_timeout,
            ),
            connect_timeout: env("COINBASE_PRO_CONNECT_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            reconnect_delay_initial: parse_env_duration_millis(
                &env,
                "NOTIFIER_RECONNECT_INITIAL_MS",
                ws_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                &env,
                "NOTIFIER_RECONNECT_MAX_SECS",
                ws_defaults.reconnect_delay_max,
            ),
            max_reconnect_attempts: parse_env_u32(
                &env,
                "NOTIFIER_MAX_RECONNECT_ATTEMPTS",
                ws_defaults.max_reconnect_attempts,
            ),
            reconnect_jitter: parse_env_fraction(
                &env,
                "NOTIFIER_RECONNECT_JITTER",
                ws_defaults.reconnect_jitter,
            ),
        };

        let notifier_defaults = NotifierSettings::default();
        let notifier = NotifierSettings {
            queue_capacity: parse_env_usize(
                &env,
                "NOTIFIER_QUEUE_CAPACITY",
                notifier_defaults.queue_capacity,
            ),
            max_users: parse_env_usize(&env, "NOTIFIER_MAX_USERS", notifier_defaults.max_users),
            startup_delay: parse_env_duration_millis(
                &env,
                "NOTIFIER_STARTUP_DELAY_MS",
                notifier_defaults.startup_delay,
            ),
            catalog_refresh_interval: parse_env_duration_secs(
                &env,
                "NOTIFIER_CATALOG_REFRESH_SECS",
                notifier_defaults.catalog_refresh_interval,
            ),
        };

        let storage = match env("DATABASE_FILE") {
            Some(path) if path.trim().is_empty() => StorageSettings {
                database_file: None,
            },
            Some(path) => StorageSettings {
                database_file: Some(PathBuf::from(path)),
            },
            None => StorageSettings::default(),
        };

        let server = ServerSettings {
            health_port: parse_env_u16(
                &env,
                "NOTIFIER_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            telegram,
            coinbase,
            websocket,
            notifier,
            storage,
            server,
        })
    }

    /// Settings shared by every watcher.
    #[must_use]
    pub fn watcher_config(&self) -> WatcherConfig {
        let ws = &self.websocket;
        WatcherConfig {
            url: self.coinbase.websocket_url.clone(),
            heartbeat: HeartbeatConfig::new(ws.ping_interval, ws.read_timeout),
            reconnect: ReconnectConfig {
                initial_delay: ws.reconnect_delay_initial,
                max_delay: ws.reconnect_delay_max,
                jitter_factor: ws.reconnect_jitter,
                max_attempts: ws.max_reconnect_attempts,
                ..ReconnectConfig::default()
            },
            write_timeout: ws.write_timeout,
            connect_timeout: ws.connect_timeout,
            queue_capacity: self.notifier.queue_capacity,
        }
    }

    /// Registry limits.
    #[must_use]
    pub const fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_users: self.notifier.max_users,
            startup_delay: self.notifier.startup_delay,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

fn parse_env_u16(env: &impl Fn(&str) -> Option<String>, key: &str, default: u16) -> u16 {
    env(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_env_u32(env: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    env(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_env_usize(env: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    env(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// A value in `0.0..=1.0`; anything else falls back to `default`.
fn parse_env_fraction(env: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    env(key)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|f| (0.0..=1.0).contains(f))
        .unwrap_or(default)
}

fn parse_env_duration_secs(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    env(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    env(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
