//! Telegram Notification Sink
//!
//! Delivers rendered notifications through the Bot API `sendMessage` method.
//! A user's id doubles as their private chat id with the bot.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::application::ports::{NotificationSink, SinkError};
use crate::domain::credentials::UserId;

/// Default Bot API base URL.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Bot API client implementing [`NotificationSink`].
#[derive(Clone)]
pub struct TelegramSink {
    client: Client,
    api_url: String,
    token: String,
    admin_chat_id: Option<i64>,
}

impl TelegramSink {
    /// Create a sink for the bot identified by `token`.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Transport` if the HTTP client cannot be built.
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        admin_chat_id: Option<i64>,
    ) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            admin_chat_id,
        })
    }

    async fn send(&self, chat_id: i64, text: &str) -> Result<(), SinkError> {
        if text.is_empty() {
            return Ok(());
        }

        let url = format!("{}/bot{}/sendMessage", self.api_url, self.token);
        let response = self
            .client
            .post(&url)
            .json(&SendMessage { chat_id, text })
            .send()
            .await
            // The URL carries the bot token.
            .map_err(|e| SinkError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(chat_id, len = text.len(), "Telegram message sent");
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send_to_user(&self, user: UserId, text: &str) -> Result<(), SinkError> {
        self.send(user.as_i64(), text).await
    }

    async fn send_to_admin(&self, text: &str) -> Result<(), SinkError> {
        let Some(chat_id) = self.admin_chat_id else {
            tracing::warn!("Admin chat not configured, dropping admin message");
            return Err(SinkError::AdminNotConfigured);
        };
        self.send(chat_id, text).await
    }
}

impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .field("admin_chat_id", &self.admin_chat_id)
            .finish_non_exhaustive()
    }
}
