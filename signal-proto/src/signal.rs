//! Signaling payloads as seen by the relay.
//!
//! The relay never rewrites what peers send each other. It only checks that a
//! text frame is a JSON object and reads its `type` field for logging; the
//! sender's text is what gets forwarded. The only messages the relay itself
//! produces are the [`ServerMessage`] variants.

use serde::{Deserialize, Serialize};

/// Reason sent to a second publisher trying to join an occupied room.
pub const PUBLISHER_PRESENT_REASON: &str = "room already has a streamer";

/// Errors produced while inspecting or encoding signaling text.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The text is not valid JSON.
    #[error("malformed signal: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The text is valid JSON but not an object.
    #[error("signal is not a JSON object")]
    NotAnObject,
    /// A server message could not be serialized.
    #[error("failed to encode server message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// What the relay learned from a well-formed signal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signal {
    /// The `type` field (`offer`, `answer`, `ice-candidate`, ...), if it is a string.
    pub kind: Option<String>,
}

impl Signal {
    /// Message kind for log lines; `"unknown"` when the sender omitted it.
    #[must_use]
    pub fn kind_or_unknown(&self) -> &str {
        self.kind.as_deref().unwrap_or("unknown")
    }
}

/// Checks that `text` is a JSON object and extracts its `type` field.
///
/// # Errors
///
/// Returns [`SignalError::Malformed`] for invalid JSON and
/// [`SignalError::NotAnObject`] for arrays, strings, numbers and the like.
pub fn inspect(text: &str) -> Result<Signal, SignalError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(SignalError::Malformed)?;
    let object = value.as_object().ok_or(SignalError::NotAnObject)?;
    let kind = object
        .get("type")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);
    Ok(Signal { kind })
}

/// Messages originated by the relay rather than forwarded from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// The connection was refused; it is closed right after this message.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ServerMessage {
    /// The rejection sent when a room already has a publisher.
    #[must_use]
    pub fn publisher_present() -> Self {
        Self::Error {
            message: PUBLISHER_PRESENT_REASON.to_string(),
        }
    }

    /// Serializes the message to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, SignalError> {
        serde_json::to_string(self).map_err(SignalError::Encode)
    }
}
