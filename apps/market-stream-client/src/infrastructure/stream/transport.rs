//! WebSocket Transport
//!
//! [`Transport`] adapter over `tokio-tungstenite`. Text frames pass
//! through untouched; ping/pong is answered by tungstenite itself; a
//! close frame or the end of the socket ends the inbound stream.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::application::ports::{Transport, TransportConnection, TransportError};
use crate::infrastructure::metrics;

/// Opens `ws://` / `wss://` connections with rustls.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create the adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<TransportConnection, TransportError> {
        tracing::debug!(url, "Opening WebSocket");

        let (ws_stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportError::Send(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

        let stream = read
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| future::ready(inbound_text(msg)));

        Ok(TransportConnection::new(sink, stream))
    }
}

/// Map one socket event to an inbound text frame, if it carries one.
fn inbound_text(msg: Result<Message, WsError>) -> Option<Result<String, TransportError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(text)),
            Err(e) => {
                tracing::warn!(
                    len = bytes.len(),
                    error = %e.utf8_error(),
                    "Dropping non-UTF-8 binary frame"
                );
                metrics::record_frame_dropped();
                None
            }
        },
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_) | Message::Close(_)) => None,
        Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frames_pass_through() {
        let out = inbound_text(Ok(Message::Text("{\"type\":\"ticker\"}".into())));
        assert_eq!(out, Some(Ok("{\"type\":\"ticker\"}".to_string())));
    }

    #[test]
    fn utf8_binary_is_treated_as_text() {
        let out = inbound_text(Ok(Message::Binary(b"{}".to_vec().into())));
        assert_eq!(out, Some(Ok("{}".to_string())));
    }

    #[test]
    fn non_utf8_binary_is_dropped_without_ending_the_stream() {
        let out = inbound_text(Ok(Message::Binary(vec![0xff, 0xfe, 0x7b].into())));
        assert_eq!(out, None);
    }

    #[test]
    fn control_frames_are_skipped() {
        assert_eq!(inbound_text(Ok(Message::Ping(Vec::<u8>::new().into()))), None);
        assert_eq!(inbound_text(Ok(Message::Pong(Vec::<u8>::new().into()))), None);
    }

    #[test]
    fn socket_errors_surface_as_receive_errors() {
        let out = inbound_text(Err(WsError::ConnectionClosed));
        assert!(matches!(out, Some(Err(TransportError::Receive(_)))));
    }

    #[tokio::test]
    async fn open_reports_connect_failure() {
        // Nothing listens on the loopback discard port.
        let result = WebSocketTransport::new().open("ws://127.0.0.1:9/stream").await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
