//! Client Lifecycle Events
//!
//! Broadcast to every `MarketStreamClient::events()` receiver. These are
//! notifications about the connection, not market data; market data goes
//! through the dispatcher.

use std::time::Duration;

/// Why a live or pending connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` or `dispose()` was called.
    Requested,
    /// The server closed the connection.
    PeerClosed,
    /// The transport failed.
    Error(String),
}

/// Connection lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Transport opened and subscriptions were queued for replay.
    Connected {
        /// Number of subscribe intents replayed.
        replayed: usize,
    },
    /// The connection ended.
    Disconnected {
        /// Why it ended.
        reason: DisconnectReason,
    },
    /// A transport open attempt failed.
    ConnectFailed {
        /// Transport error text.
        error: String,
    },
    /// A retry has been scheduled.
    Reconnecting {
        /// Retry number (1-indexed).
        attempt: u32,
        /// Delay before the retry.
        delay: Duration,
    },
    /// Retries are exhausted; no further attempts will be made until the
    /// next explicit `connect()`.
    PermanentlyDisconnected {
        /// Retries attempted before giving up.
        attempts: u32,
    },
    /// An inbound frame could not be decoded and was dropped.
    MalformedFrame {
        /// Codec error text.
        error: String,
    },
}
