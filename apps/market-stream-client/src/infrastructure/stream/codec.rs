//! Frame Codec
//!
//! JSON text encoding for the market stream. Inbound frames are objects
//! with a string `type` and an optional `data` member:
//!
//! ```json
//! {"type": "stock_update", "data": {"symbol": "AAPL", "price": 189.5}}
//! {"type": "subscribed", "symbol": "AAPL", "message": "Subscribed to AAPL"}
//! ```
//!
//! When `data` is absent the remaining members of the object become the
//! payload, so acknowledgement and error frames reach handlers intact.

use serde_json::{Map, Value};

use crate::domain::messages::{InboundFrame, MessageType, OutboundFrame};

/// Codec errors. A decode error drops one frame, never the connection.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Text was not valid JSON.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON that is not a frame object with a string `type`.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for market stream text frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the text is not a JSON object with a string
    /// `type` member.
    pub fn decode(&self, text: &str) -> Result<InboundFrame, CodecError> {
        let trimmed = text.trim();

        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                preview(trimmed)
            )));
        }

        let mut object: Map<String, Value> = serde_json::from_str(trimmed)?;

        let message_type = match object.remove("type") {
            Some(Value::String(tag)) => tag,
            Some(other) => {
                return Err(CodecError::InvalidFormat(format!(
                    "`type` must be a string, got: {}",
                    preview(&other.to_string())
                )));
            }
            None => return Err(CodecError::InvalidFormat("missing `type`".to_string())),
        };

        // A present `data` member is the payload even when it is null.
        let data = match object.remove("data") {
            Some(data) => data,
            None if object.is_empty() => Value::Null,
            None => Value::Object(object),
        };

        Ok(InboundFrame::new(MessageType::from(message_type), data))
    }

    /// Encode an outbound intent.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if serialization fails.
    pub fn encode(&self, frame: &OutboundFrame) -> Result<String, CodecError> {
        Ok(serde_json::to_string(frame)?)
    }
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}
