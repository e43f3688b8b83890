//! User Credentials
//!
//! Per-user Coinbase Pro API credentials and the presentation summary
//! handed to the bot and web collaborators. A watcher takes an immutable
//! snapshot of a [`UserCredential`] when it starts.

mod repository;

pub use repository::{CredentialRepository, RepositoryError};

#[cfg(test)]
pub use repository::MockCredentialRepository;

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// User Identifier
// =============================================================================

/// Chat identity of a registered user.
///
/// Doubles as the Telegram chat id notifications are delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Wrap a raw chat id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw chat id.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// User Credential
// =============================================================================

/// Persisted credential record for one user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    /// Unique user identifier.
    pub id: UserId,
    /// Name used when addressing the user in admin messages.
    pub display_name: String,
    /// Optional chat username.
    #[serde(default)]
    pub username: Option<String>,
    /// Coinbase Pro API key.
    pub api_key: String,
    /// Base64-encoded Coinbase Pro API secret.
    pub api_secret: String,
    /// Coinbase Pro API passphrase.
    pub api_passphrase: String,
    /// Whether the user wants order notifications.
    pub active: bool,
}

impl UserCredential {
    /// Create an inactive credential record with no API settings.
    #[must_use]
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            username: None,
            api_key: String::new(),
            api_secret: String::new(),
            api_passphrase: String::new(),
            active: false,
        }
    }

    /// Attach API settings.
    #[must_use]
    pub fn with_api(
        mut self,
        key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.api_key = key.into();
        self.api_secret = secret.into();
        self.api_passphrase = passphrase.into();
        self
    }

    /// Set the active flag.
    #[must_use]
    pub const fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Whether an API key has been configured.
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// `"{display_name} ({id})"`, used in admin messages and logs.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} ({})", self.display_name, self.id)
    }

    /// Presentation summary.
    #[must_use]
    pub fn summary(&self, watching: bool) -> CredentialSummary {
        CredentialSummary {
            id: self.id,
            display_name: self.display_name.clone(),
            username: self.username.clone(),
            active: self.active,
            watching,
        }
    }
}

impl fmt::Debug for UserCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredential")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("username", &self.username)
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .field("api_passphrase", &"[REDACTED]")
            .field("active", &self.active)
            .finish()
    }
}

// =============================================================================
// Credential Summary
// =============================================================================

/// Secret-free view of a credential record for list commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialSummary {
    /// User identifier.
    pub id: UserId,
    /// Display name.
    pub display_name: String,
    /// Optional chat username.
    pub username: Option<String>,
    /// Persisted active flag.
    pub active: bool,
    /// Whether a watcher is currently registered for the user.
    pub watching: bool,
}

impl fmt::Display for CredentialSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)?;
        if let Some(username) = &self.username {
            write!(f, " @{username}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
