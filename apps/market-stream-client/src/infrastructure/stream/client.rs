//! Market Stream Client
//!
//! The facade collaborators use. Every operation is synchronous and
//! returns immediately; network effects happen on the session task and
//! are observed through [`ClientEvent`]s, [`ConnectionState`], and the
//! registered handlers.
//!
//! Nothing here surfaces transport faults to the caller: they become
//! state transitions and events. The only fallible operations are
//! `subscribe`/`unsubscribe`, and only for unusable symbol input.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::events::{ClientEvent, DisconnectReason};
use super::session::{self, Shared};
use super::transport::WebSocketTransport;
use crate::application::dispatcher::MessageHandler;
use crate::application::ports::Transport;
use crate::domain::connection::{ConnectionInput, ConnectionState, Directive};
use crate::domain::messages::{MessageType, OutboundFrame};
use crate::domain::symbol::{Symbol, SymbolError};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::metrics;

/// Reconnecting market data client.
///
/// Cheap to clone; clones share one connection, one subscription set and
/// one handler table. Must be used from within a Tokio runtime.
///
/// # Example
///
/// ```rust,no_run
/// use market_stream_client::{ClientConfig, MarketStreamClient, MessageHandler};
///
/// # async fn demo() -> anyhow::Result<()> {
/// let client = MarketStreamClient::with_websocket(ClientConfig::new("wss://example.com/ws/market/"));
///
/// client.on("stock_update", MessageHandler::new(|data| {
///     println!("update: {data}");
///     Ok(())
/// }));
/// client.subscribe("aapl")?;
/// client.connect();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MarketStreamClient {
    shared: Arc<Shared>,
}

impl MarketStreamClient {
    /// Create a disconnected client over the given transport.
    pub fn new<T: Transport>(config: ClientConfig, transport: T) -> Self {
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a disconnected client over a shared transport.
    #[must_use]
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Arc::new(Shared::new(config, transport)),
        }
    }

    /// Create a disconnected client over a real WebSocket.
    #[must_use]
    pub fn with_websocket(config: ClientConfig) -> Self {
        Self::new(config, WebSocketTransport::new())
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Start a session. No-op while connecting or open.
    ///
    /// While a retry is pending the delay is skipped and a new transport is
    /// opened at once; the failure count carries over.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn connect(&self) {
        let (generation, cancel) = {
            let mut session = self.shared.session.lock();
            if self.shared.transition(&mut session, ConnectionInput::Connect)
                != Some(Directive::OpenTransport)
            {
                tracing::debug!(state = %session.machine.state(), "connect() ignored");
                return;
            }

            if let Some(stale) = session.cancel.take() {
                stale.cancel();
            }
            session.generation += 1;
            let cancel = CancellationToken::new();
            session.cancel = Some(cancel.clone());
            (session.generation, cancel)
        };

        let span = tracing::info_span!(
            "market_stream_session",
            url = %self.shared.config.url,
            generation
        );
        tokio::spawn(session::run(Arc::clone(&self.shared), generation, cancel).instrument(span));
    }

    /// End the session: close the transport and cancel any pending retry.
    ///
    /// Subscriptions and handlers are kept for a later `connect()`.
    pub fn disconnect(&self) {
        let directive = {
            let mut session = self.shared.session.lock();
            let directive = self
                .shared
                .transition(&mut session, ConnectionInput::Disconnect);

            session.detach();
            session.generation += 1;
            if let Some(cancel) = session.cancel.take() {
                cancel.cancel();
            }
            directive
        };

        if directive == Some(Directive::CloseTransport) {
            tracing::info!("Market stream disconnected");
            self.shared.emit(ClientEvent::Disconnected {
                reason: DisconnectReason::Requested,
            });
        }
    }

    /// Disconnect and forget all subscriptions and handlers.
    pub fn dispose(&self) {
        self.disconnect();
        self.shared.session.lock().registry.clear();
        self.shared.dispatcher.clear();
        metrics::set_subscriptions(0);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.session.lock().machine.state()
    }

    /// Consecutive retries since the last successful open.
    #[must_use]
    pub fn retry_attempts(&self) -> u32 {
        self.shared.session.lock().machine.retry_attempts()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Receive lifecycle events from now on.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Want updates for `symbol` (case-insensitive).
    ///
    /// Sent immediately if the connection is open, otherwise replayed on
    /// the next open. Returns `true` if the symbol was newly added.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError` if `symbol` is empty or malformed.
    pub fn subscribe(&self, symbol: &str) -> Result<bool, SymbolError> {
        let symbol = Symbol::parse(symbol)?;

        let mut session = self.shared.session.lock();
        let added = session.registry.insert(symbol.clone());

        if added && session.machine.state().is_open() {
            session.send(OutboundFrame::subscribe(symbol.clone()));
        }
        metrics::set_subscriptions(session.registry.len());
        drop(session);

        tracing::debug!(%symbol, added, "Subscribed");
        Ok(added)
    }

    /// Stop wanting updates for `symbol` (case-insensitive).
    ///
    /// Returns `true` if the symbol was subscribed.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError` if `symbol` is empty or malformed.
    pub fn unsubscribe(&self, symbol: &str) -> Result<bool, SymbolError> {
        let symbol = Symbol::parse(symbol)?;

        let mut session = self.shared.session.lock();
        let removed = session.registry.remove(&symbol);

        if removed && session.machine.state().is_open() {
            session.send(OutboundFrame::unsubscribe(symbol.clone()));
        }
        metrics::set_subscriptions(session.registry.len());
        drop(session);

        tracing::debug!(%symbol, removed, "Unsubscribed");
        Ok(removed)
    }

    /// Whether `symbol` (case-insensitive) is currently wanted.
    #[must_use]
    pub fn is_subscribed(&self, symbol: &str) -> bool {
        Symbol::parse(symbol)
            .is_ok_and(|symbol| self.shared.session.lock().registry.contains(&symbol))
    }

    /// Currently wanted symbols, in canonical order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Symbol> {
        self.shared.session.lock().registry.symbols()
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Register `handler` for `message_type`. Works in any connection state.
    pub fn on(&self, message_type: impl Into<MessageType>, handler: MessageHandler) {
        self.shared.dispatcher.on(message_type, handler);
    }

    /// Remove one registration of `handler` for `message_type`.
    ///
    /// Returns `true` if a registration was removed.
    pub fn off(&self, message_type: impl Into<MessageType>, handler: &MessageHandler) -> bool {
        self.shared.dispatcher.off(message_type, handler)
    }

    /// Number of handlers registered for `message_type`.
    #[must_use]
    pub fn handler_count(&self, message_type: impl Into<MessageType>) -> usize {
        self.shared.dispatcher.handler_count(&message_type.into())
    }
}

impl std::fmt::Debug for MarketStreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.shared.session.lock();
        f.debug_struct("MarketStreamClient")
            .field("url", &self.shared.config.url)
            .field("state", &session.machine.state())
            .field("subscriptions", &session.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::ports::{MockTransport, TransportError};
    use crate::domain::connection::ReconnectConfig;

    fn config(max_attempts: u32) -> ClientConfig {
        ClientConfig::new("ws://market.test/ws/market/")
            .with_reconnect(ReconnectConfig::default().with_max_attempts(max_attempts))
    }

    fn refusing_transport(expected_opens: usize) -> MockTransport {
        let mut transport = MockTransport::new();
        transport
            .expect_open()
            .times(expected_opens)
            .returning(|_| Err(TransportError::Connect("connection refused".into())));
        transport
    }

    #[tokio::test(start_paused = true)]
    async fn open_failures_back_off_then_give_up() {
        // Initial attempt plus three retries.
        let client = MarketStreamClient::new(config(3), refusing_transport(4));
        let mut events = client.events();

        client.connect();

        let mut delays = Vec::new();
        loop {
            match events.recv().await.unwrap() {
                ClientEvent::Reconnecting { delay, .. } => delays.push(delay),
                ClientEvent::PermanentlyDisconnected { attempts } => {
                    assert_eq!(attempts, 3);
                    break;
                }
                ClientEvent::ConnectFailed { .. } => {}
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
            ]
        );
        assert_eq!(client.state(), ConnectionState::ClosedPermanent);

        // No stray retry is left behind.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(client.state(), ConnectionState::ClosedPermanent);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_retry() {
        let client = MarketStreamClient::new(config(5), refusing_transport(1));
        let mut events = client.events();

        client.connect();
        loop {
            if let ClientEvent::Reconnecting { attempt, .. } = events.recv().await.unwrap() {
                assert_eq!(attempt, 1);
                break;
            }
        }

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        // The 1s retry would have fired here; the mock allows one open only.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn subscriptions_are_tracked_while_disconnected() {
        let client = MarketStreamClient::new(config(5), MockTransport::new());

        assert!(client.subscribe("aapl").unwrap());
        assert!(!client.subscribe("AAPL").unwrap());
        assert!(client.subscribe("msft").unwrap());
        assert!(client.unsubscribe("Msft").unwrap());
        assert!(!client.unsubscribe("TSLA").unwrap());

        assert_eq!(client.subscriptions(), vec![Symbol::parse("AAPL").unwrap()]);
        assert!(client.is_subscribed("aapl"));
        assert!(!client.is_subscribed("msft"));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn invalid_symbols_are_rejected() {
        let client = MarketStreamClient::new(config(5), MockTransport::new());

        assert_eq!(client.subscribe("  "), Err(SymbolError::Empty));
        assert!(client.unsubscribe("").is_err());
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn dispose_forgets_everything() {
        let client = MarketStreamClient::new(config(5), MockTransport::new());
        client.subscribe("NVDA").unwrap();
        client.on("ticker", MessageHandler::new(|_| Ok(())));

        client.dispose();

        assert!(client.subscriptions().is_empty());
        assert_eq!(client.handler_count("ticker"), 0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
