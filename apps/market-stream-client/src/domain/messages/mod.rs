//! Market Stream Message Types
//!
//! Wire-level shapes exchanged with the market feed.
//!
//! # Outbound
//!
//! ```json
//! {"type": "subscribe", "symbol": "AAPL"}
//! {"type": "unsubscribe", "symbol": "AAPL"}
//! ```
//!
//! # Inbound
//!
//! ```json
//! {"type": "stock_update", "data": {"symbol": "AAPL", "price": 189.5, ...}}
//! {"type": "subscribed", "symbol": "AAPL", "message": "Subscribed to AAPL"}
//! ```
//!
//! The client routes inbound frames by `type` and never looks inside the
//! payload. The typed payload views at the bottom of this module exist
//! for handlers that want them.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::symbol::Symbol;

// =============================================================================
// Message Type Tag
// =============================================================================

/// Inbound message tag.
///
/// Known server tags get their own variant so handler registration can be
/// matched exhaustively. Any other tag is carried verbatim in `Unknown` and
/// is routed like any other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Price snapshot for one instrument.
    StockUpdate,
    /// Lightweight price tick.
    PriceUpdate,
    /// Ticker tape entry.
    Ticker,
    /// Technical indicator refresh.
    IndicatorUpdate,
    /// News sentiment refresh.
    SentimentUpdate,
    /// Model prediction refresh.
    PredictionUpdate,
    /// News headline.
    NewsUpdate,
    /// Server acknowledged a subscribe intent.
    Subscribed,
    /// Server acknowledged an unsubscribe intent.
    Unsubscribed,
    /// Server-side error report.
    Error,
    /// Any tag this client has no name for.
    Unknown(String),
}

impl MessageType {
    /// Wire tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::StockUpdate => "stock_update",
            Self::PriceUpdate => "price_update",
            Self::Ticker => "ticker",
            Self::IndicatorUpdate => "indicator_update",
            Self::SentimentUpdate => "sentiment_update",
            Self::PredictionUpdate => "prediction_update",
            Self::NewsUpdate => "news_update",
            Self::Subscribed => "subscribed",
            Self::Unsubscribed => "unsubscribed",
            Self::Error => "error",
            Self::Unknown(tag) => tag,
        }
    }

    /// Whether the tag is one this client names.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        match tag {
            "stock_update" => Self::StockUpdate,
            "price_update" => Self::PriceUpdate,
            "ticker" => Self::Ticker,
            "indicator_update" => Self::IndicatorUpdate,
            "sentiment_update" => Self::SentimentUpdate,
            "prediction_update" => Self::PredictionUpdate,
            "news_update" => Self::NewsUpdate,
            "subscribed" => Self::Subscribed,
            "unsubscribed" => Self::Unsubscribed,
            "error" => Self::Error,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        match Self::from(tag.as_str()) {
            Self::Unknown(_) => Self::Unknown(tag),
            known => known,
        }
    }
}

impl From<MessageType> for String {
    fn from(message_type: MessageType) -> Self {
        match message_type {
            MessageType::Unknown(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Frames
// =============================================================================

/// A decoded inbound frame: a routing tag plus an opaque payload.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    /// Routing tag.
    pub message_type: MessageType,
    /// Opaque payload handed to handlers.
    pub data: Value,
}

impl InboundFrame {
    /// Create a frame.
    #[must_use]
    pub const fn new(message_type: MessageType, data: Value) -> Self {
        Self { message_type, data }
    }

    /// Deserialize the payload into a typed view.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the payload does not match `T`.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// Subscription intent sent to the server. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Start streaming a symbol.
    Subscribe {
        /// Canonical symbol.
        symbol: Symbol,
    },
    /// Stop streaming a symbol.
    Unsubscribe {
        /// Canonical symbol.
        symbol: Symbol,
    },
}

impl OutboundFrame {
    /// Subscribe intent.
    #[must_use]
    pub const fn subscribe(symbol: Symbol) -> Self {
        Self::Subscribe { symbol }
    }

    /// Unsubscribe intent.
    #[must_use]
    pub const fn unsubscribe(symbol: Symbol) -> Self {
        Self::Unsubscribe { symbol }
    }

    /// The symbol this intent refers to.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        match self {
            Self::Subscribe { symbol } | Self::Unsubscribe { symbol } => symbol,
        }
    }

    /// Wire action name.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

// =============================================================================
// Typed Payload Views
// =============================================================================

/// Payload of `stock_update` / `price_update` / `ticker` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdate {
    /// Instrument ticker.
    pub symbol: String,
    /// Last price.
    pub price: Decimal,
    /// Absolute change since previous close.
    #[serde(default)]
    pub change: Decimal,
    /// Percentage change since previous close.
    #[serde(default)]
    pub change_percent: Decimal,
    /// Session volume.
    #[serde(default)]
    pub volume: u64,
    /// Server timestamp, when provided.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Payload of `subscribed` / `unsubscribed` acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionAck {
    /// Acknowledged ticker.
    pub symbol: String,
    /// Human-readable confirmation.
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload of `error` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error description.
    pub message: String,
}
