//! Decoded server-sent event frames.

use serde::{Deserialize, Serialize};

/// Event type assigned to frames that carry only `data:` lines.
pub const DEFAULT_EVENT: &str = "message";

/// Terminal event emitted by the backend when a stream finishes cleanly.
pub const DONE_EVENT: &str = "done";

/// Error event emitted by the backend when generation fails server-side.
pub const ERROR_EVENT: &str = "error";

/// One decoded frame from a streaming transport.
///
/// The event name and payload are opaque to the decoder; structured
/// payloads (typically JSON) are interpreted by consumers. Unknown event
/// names must be treated as forward-compatible no-ops, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name, e.g. `message`, `status`, `opinion_chunk`.
    pub event: String,
    /// Raw payload text; multiple `data:` lines are joined with `\n`.
    pub data: String,
}

impl Frame {
    /// Create a frame with an explicit event name.
    #[must_use]
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Create a default-typed (`message`) frame.
    #[must_use]
    pub fn message(data: impl Into<String>) -> Self {
        Self::new(DEFAULT_EVENT, data)
    }

    /// Parse the payload as JSON.
    ///
    /// Payload interpretation belongs to consumers; a parse failure is
    /// logged and the frame is skipped, never raised.
    #[must_use]
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        match serde_json::from_str(&self.data) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(
                    event = %self.event,
                    error = %e,
                    "skipping frame with malformed JSON payload"
                );
                None
            }
        }
    }
}
