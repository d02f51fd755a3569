//! Port Interfaces
//!
//! The client talks to the network only through [`Transport`]. Opening a
//! transport yields a split pair: a sink for outbound text frames and a
//! stream of inbound text frames. The stream ending (`None`) means the
//! peer closed the connection.
//!
//! The production adapter is
//! [`WebSocketTransport`](crate::infrastructure::stream::WebSocketTransport);
//! tests plug in channel-backed fakes.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, Stream};

/// Outbound half of a live transport.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a live transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// A freshly opened transport.
pub struct TransportConnection {
    /// Where outbound text frames go.
    pub sink: FrameSink,
    /// Where inbound text frames come from.
    pub stream: FrameStream,
}

impl TransportConnection {
    /// Bundle a sink and a stream.
    pub fn new<K, S>(sink: K, stream: S) -> Self
    where
        K: Sink<String, Error = TransportError> + Send + 'static,
        S: Stream<Item = Result<String, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection").finish_non_exhaustive()
    }
}

/// Opens persistent bidirectional connections to the market feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the connection cannot be established.
    async fn open(&self, url: &str) -> Result<TransportConnection, TransportError>;
}

/// Transport-level failures. Always recoverable from the client's view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
}
