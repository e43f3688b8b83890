//! Stream Codec
//!
//! Decodes Coinbase Pro feed frames into [`StreamMessage`] once, at the
//! protocol boundary, so the watcher only ever matches on a closed enum.
//! Frames with an unrecognised `type` decode to [`StreamMessage::Unknown`]
//! rather than failing.

use serde::de::DeserializeOwned;

use super::messages::{StreamMessage, SubscribeRequest};
use crate::domain::notification::OrderEventKind;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not a JSON object with a string `type` field.
    #[error("frame has no type field: {0}")]
    MissingType(String),
}

/// JSON codec for the Coinbase Pro feed.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, has no `type`, or a known
    /// type carries fields of the wrong shape.
    pub fn decode(&self, text: &str) -> Result<StreamMessage, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        let Some(kind) = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
        else {
            return Err(CodecError::MissingType(preview(text)));
        };

        let message = match kind.as_str() {
            "received" => order(OrderEventKind::Received, value)?,
            "open" => order(OrderEventKind::Open, value)?,
            "done" => order(OrderEventKind::Done, value)?,
            "match" => order(OrderEventKind::Match, value)?,
            "change" => order(OrderEventKind::Change, value)?,
            "activate" => order(OrderEventKind::Activate, value)?,
            "error" => StreamMessage::Error(from_value(value)?),
            "subscriptions" => StreamMessage::Subscriptions(from_value(value)?),
            "status" => StreamMessage::Status(from_value(value)?),
            "heartbeat" => StreamMessage::Heartbeat(from_value(value)?),
            _ => StreamMessage::Unknown {
                kind: kind.clone(),
                raw: text.to_string(),
            },
        };

        Ok(message)
    }

    /// Encode a subscribe request as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_subscribe(&self, request: &SubscribeRequest) -> Result<String, CodecError> {
        Ok(serde_json::to_string(request)?)
    }
}

fn order(kind: OrderEventKind, value: serde_json::Value) -> Result<StreamMessage, CodecError> {
    Ok(StreamMessage::Order(kind, Box::new(from_value(value)?)))
}

fn from_value<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, CodecError> {
    Ok(serde_json::from_value(value)?)
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}

// =============================================================================
// Tests
// =============================================================================
