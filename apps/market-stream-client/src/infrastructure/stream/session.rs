//! Session Driver
//!
//! One task per session (`connect()` up to `disconnect()` or permanent
//! failure). The task opens transports, pumps frames in both directions,
//! and sleeps through backoff delays. Every decision about what happens
//! next comes from the shared [`ConnectionMachine`]. The task runs inside
//! the `market_stream_session` span (`url`, `generation`).
//!
//! Machine, registry and the live outbound queue share one mutex, so a
//! subscribe racing an open either lands in the replay snapshot or is
//! queued behind it; it is never lost. The mutex is never held across an
//! `.await` or while handlers run.

use std::sync::Arc;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::codec::FrameCodec;
use super::events::{ClientEvent, DisconnectReason};
use crate::application::dispatcher::Dispatcher;
use crate::application::ports::{FrameSink, Transport, TransportConnection};
use crate::domain::connection::{ConnectionInput, ConnectionMachine, ConnectionState, Directive};
use crate::domain::messages::OutboundFrame;
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::metrics;

// =============================================================================
// Shared State
// =============================================================================

/// Mutable session state, serialized by one mutex.
pub(crate) struct Session {
    pub(crate) machine: ConnectionMachine,
    pub(crate) registry: SubscriptionRegistry,
    /// Bumped on every connect and disconnect; tasks from older sessions
    /// see a mismatch and exit.
    pub(crate) generation: u64,
    pub(crate) cancel: Option<CancellationToken>,
    outbound: Option<mpsc::UnboundedSender<OutboundFrame>>,
}

impl Session {
    pub(crate) fn new(machine: ConnectionMachine) -> Self {
        Self {
            machine,
            registry: SubscriptionRegistry::new(),
            generation: 0,
            cancel: None,
            outbound: None,
        }
    }

    /// Queue a frame on the live connection. Returns `false` if there is none.
    pub(crate) fn send(&self, frame: OutboundFrame) -> bool {
        self.outbound.as_ref().is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Detach the live outbound queue.
    pub(crate) fn detach(&mut self) {
        self.outbound = None;
    }
}

/// Everything the facade and the session task share.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) codec: FrameCodec,
    pub(crate) session: Mutex<Session>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) events: broadcast::Sender<ClientEvent>,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    pub(crate) fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let machine = ConnectionMachine::new(config.reconnect.clone());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            config,
            transport,
            codec: FrameCodec::new(),
            session: Mutex::new(Session::new(machine)),
            dispatcher: Dispatcher::new(),
            events,
            state_tx,
        }
    }

    /// Feed the machine and publish the resulting state.
    pub(crate) fn transition(
        &self,
        session: &mut Session,
        input: ConnectionInput,
    ) -> Option<Directive> {
        let directive = session.machine.apply(input);
        let state = session.machine.state();

        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        metrics::set_connection_state(state);

        directive
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Transport opened: go `Open`, queue the replay, attach the outbound queue.
    ///
    /// Returns `None` if this session has been superseded.
    fn opened(
        &self,
        generation: u64,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
    ) -> Option<usize> {
        let mut session = self.session.lock();
        if session.generation != generation {
            return None;
        }

        match self.transition(&mut session, ConnectionInput::TransportOpened) {
            Some(Directive::ReplaySubscriptions) => {
                let replay = session.registry.replay();
                let replayed = replay.len();
                for frame in replay {
                    // Receiver is alive: it is owned by the caller.
                    let _ = outbound.send(frame);
                }
                session.outbound = Some(outbound);
                Some(replayed)
            }
            _ => None,
        }
    }

    /// Transport failed to open, errored, or closed.
    fn closed(&self, generation: u64, reason: DisconnectReason, was_open: bool) -> Option<Directive> {
        let directive = {
            let mut session = self.session.lock();
            if session.generation != generation {
                return None;
            }
            session.detach();
            self.transition(&mut session, ConnectionInput::TransportClosed)
        };

        if was_open {
            self.emit(ClientEvent::Disconnected { reason });
        } else if let DisconnectReason::Error(error) = reason {
            self.emit(ClientEvent::ConnectFailed { error });
        }

        match directive {
            Some(Directive::ScheduleRetry { attempt, delay }) => {
                tracing::info!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Reconnecting to market stream"
                );
                metrics::record_reconnect();
                self.emit(ClientEvent::Reconnecting { attempt, delay });
            }
            Some(Directive::GiveUp { attempts }) => {
                tracing::error!(
                    attempts,
                    "Maximum reconnection attempts reached; giving up"
                );
                self.emit(ClientEvent::PermanentlyDisconnected { attempts });
            }
            _ => {}
        }

        directive
    }

    fn retry_elapsed(&self, generation: u64) -> Option<Directive> {
        let mut session = self.session.lock();
        if session.generation != generation {
            return None;
        }
        self.transition(&mut session, ConnectionInput::RetryElapsed)
    }

    /// Decode one inbound frame and route it. Never fails the connection.
    fn handle_text(&self, text: &str) {
        match self.codec.decode(text) {
            Ok(frame) => {
                metrics::record_frame_received(&frame.message_type);
                let started = Instant::now();
                let report = self.dispatcher.dispatch(&frame);
                metrics::record_dispatch_duration(&frame.message_type, started.elapsed());
                if report.failed > 0 {
                    metrics::record_handler_failures(&frame.message_type, report.failed);
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    len = text.len(),
                    "Dropping malformed frame"
                );
                metrics::record_frame_dropped();
                self.emit(ClientEvent::MalformedFrame {
                    error: e.to_string(),
                });
            }
        }
    }

    async fn send_frame(&self, sink: &mut FrameSink, frame: &OutboundFrame) -> Result<(), String> {
        let text = match self.codec.encode(frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, symbol = %frame.symbol(), "Failed to encode intent");
                return Ok(());
            }
        };

        tracing::debug!(action = frame.action(), symbol = %frame.symbol(), "Sending intent");
        sink.send(text).await.map_err(|e| e.to_string())?;
        metrics::record_frame_sent(frame.action());
        Ok(())
    }
}

// =============================================================================
// Session Task
// =============================================================================

/// Run one session until it is cancelled, superseded, or gives up.
pub(crate) async fn run(shared: Arc<Shared>, generation: u64, cancel: CancellationToken) {
    loop {
        tracing::info!("Connecting to market stream");

        let opened = tokio::select! {
            () = cancel.cancelled() => return,
            result = shared.transport.open(&shared.config.url) => result,
        };

        let directive = match opened {
            Ok(connection) => pump(&shared, generation, &cancel, connection).await,
            Err(e) => {
                tracing::warn!(error = %e, "Market stream connection failed");
                shared.closed(generation, DisconnectReason::Error(e.to_string()), false)
            }
        };

        let Some(Directive::ScheduleRetry { delay, .. }) = directive else {
            return;
        };

        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("Session cancelled during reconnect delay");
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }

        if shared.retry_elapsed(generation) != Some(Directive::OpenTransport) {
            return;
        }
    }
}

/// Drive one open transport. Returns the machine's directive once it ends.
async fn pump(
    shared: &Shared,
    generation: u64,
    cancel: &CancellationToken,
    connection: TransportConnection,
) -> Option<Directive> {
    let TransportConnection {
        mut sink,
        mut stream,
    } = connection;
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let Some(replayed) = shared.opened(generation, tx) else {
        let _ = sink.close().await;
        return None;
    };

    tracing::info!(replayed, "Market stream connected");
    shared.emit(ClientEvent::Connected { replayed });

    // Replay goes out before anything inbound is dispatched.
    let mut failure = None;
    while let Ok(frame) = rx.try_recv() {
        if let Err(e) = shared.send_frame(&mut sink, &frame).await {
            failure = Some(e);
            break;
        }
    }

    let reason = match failure {
        Some(e) => DisconnectReason::Error(e),
        None => loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = sink.close().await;
                    return None;
                }
                Some(frame) = rx.recv() => {
                    if let Err(e) = shared.send_frame(&mut sink, &frame).await {
                        break DisconnectReason::Error(e);
                    }
                }
                msg = stream.next() => match msg {
                    Some(Ok(text)) => shared.handle_text(&text),
                    Some(Err(e)) => break DisconnectReason::Error(e.to_string()),
                    None => break DisconnectReason::PeerClosed,
                },
            }
        },
    };

    match &reason {
        DisconnectReason::Error(error) => {
            tracing::warn!(error = %error, "Market stream connection lost");
        }
        _ => tracing::info!("Market stream closed by server"),
    }

    shared.closed(generation, reason, true)
}
