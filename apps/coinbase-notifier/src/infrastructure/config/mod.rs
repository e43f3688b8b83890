//! Configuration Module
//!
//! Configuration loading for the notifier service.

mod settings;

pub use settings::{
    CoinbaseSettings, ConfigError, NotifierConfig, NotifierSettings, ServerSettings,
    StorageSettings, TelegramSettings, WebSocketSettings,
};
