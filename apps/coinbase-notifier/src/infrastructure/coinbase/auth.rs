//! Coinbase Pro WebSocket Authentication
//!
//! The authenticated `user` channel is opened by attaching signed request
//! headers to the subscribe envelope instead of a separate auth handshake.
//!
//! # Signing Scheme
//!
//! ```text
//! prehash   = timestamp + "GET" + "/users/self/verify"
//! signature = base64( HMAC-SHA256( base64_decode(secret), prehash ) )
//! ```
//!
//! The timestamp is Unix seconds. The venue rejects signatures whose
//! timestamp drifts more than 30 seconds from its clock.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use super::messages::{Channel, SubscribeRequest};
use crate::domain::credentials::UserCredential;

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Constants
// =============================================================================

/// HTTP method covered by the subscribe signature.
pub const SIGNATURE_METHOD: &str = "GET";

/// Request path covered by the subscribe signature.
pub const SIGNATURE_PATH: &str = "/users/self/verify";

/// Channel carrying a user's own order updates.
pub const USER_CHANNEL: &str = "user";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while signing a subscribe request.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Secret is not valid base64.
    #[error("API secret is not valid base64: {0}")]
    InvalidSecret(String),

    /// HMAC key could not be constructed.
    #[error("HMAC initialisation failed: {0}")]
    Hmac(String),
}

// =============================================================================
// Signer
// =============================================================================

/// Signs subscribe envelopes for one user's API key.
///
/// `Debug` output redacts everything but the key.
#[derive(Clone)]
pub struct RequestSigner {
    key: String,
    secret: String,
    passphrase: String,
}

impl RequestSigner {
    /// Create a signer from raw API settings.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
            passphrase: passphrase.into(),
        }
    }

    /// Create a signer from a stored credential.
    #[must_use]
    pub fn from_credential(credential: &UserCredential) -> Self {
        Self::new(
            credential.api_key.clone(),
            credential.api_secret.clone(),
            credential.api_passphrase.clone(),
        )
    }

    /// Compute `base64(HMAC-SHA256(secret, timestamp + method + path + body))`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if the secret is not valid base64.
    pub fn sign(
        &self,
        timestamp: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<String, AuthError> {
        let secret = BASE64
            .decode(self.secret.trim())
            .map_err(|e| AuthError::InvalidSecret(e.to_string()))?;

        let mut mac =
            HmacSha256::new_from_slice(&secret).map_err(|e| AuthError::Hmac(e.to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());

        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Build a signed `user` channel subscription for `product_ids`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if signing fails.
    pub fn subscribe_request(
        &self,
        product_ids: Vec<String>,
        timestamp: i64,
    ) -> Result<SubscribeRequest, AuthError> {
        let timestamp = timestamp.to_string();
        let signature = self.sign(&timestamp, SIGNATURE_METHOD, SIGNATURE_PATH, "")?;

        Ok(SubscribeRequest {
            kind: "subscribe".to_string(),
            channels: vec![Channel {
                name: USER_CHANNEL.to_string(),
                product_ids,
            }],
            key: self.key.clone(),
            passphrase: self.passphrase.clone(),
            timestamp,
            signature,
        })
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
