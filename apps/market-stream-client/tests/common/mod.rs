//! In-memory transport shared by the integration tests.
//!
//! Each `open()` hands a [`ServerEnd`] to the test through
//! [`MemoryTransport::accept`], so the test plays the server: it reads the
//! client's intents from `inbox` and pushes frames through `push`.
//! Dropping the `ServerEnd` closes the connection from the server side.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt, future};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use market_stream_client::{
    ClientConfig, ClientEvent, MarketStreamClient, ReconnectConfig, Transport,
    TransportConnection, TransportError,
};

pub const URL: &str = "ws://market.test/ws/market/";

/// Ordered record of frames sent by the client and frames handled by it.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Server side of one in-memory connection.
pub struct ServerEnd {
    pub inbox: mpsc::UnboundedReceiver<String>,
    outbox: mpsc::UnboundedSender<Result<String, TransportError>>,
}

impl ServerEnd {
    /// Send a raw text frame to the client.
    pub fn push(&self, text: impl Into<String>) {
        self.outbox.unbounded_send(Ok(text.into())).unwrap();
    }

    /// Send a JSON frame to the client.
    pub fn push_json(&self, value: &Value) {
        self.push(value.to_string());
    }

    /// Fail the connection with a receive error.
    pub fn fail(&self, error: &str) {
        self.outbox
            .unbounded_send(Err(TransportError::Receive(error.to_string())))
            .unwrap();
    }

    /// Assert the client sends nothing more for a while.
    pub async fn assert_idle(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(200), self.inbox.next()).await;
        assert!(next.is_err(), "unexpected client frame: {next:?}");
    }

    /// Next intent from the client, decoded.
    pub async fn recv_json(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(30), self.inbox.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client closed the connection");
        serde_json::from_str(&text).unwrap()
    }
}

#[derive(Clone)]
pub struct MemoryTransport {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    refuse: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
    journal: Journal,
}

impl MemoryTransport {
    /// Transport plus the receiving end for accepted connections.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded();
        let transport = Self {
            accepted,
            refuse: Arc::new(AtomicBool::new(false)),
            opens: Arc::new(AtomicUsize::new(0)),
            journal: Arc::default(),
        };
        (transport, rx)
    }

    /// Make every subsequent `open()` fail (or succeed again).
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of `open()` calls so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn journal(&self) -> Journal {
        Arc::clone(&self.journal)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &str) -> Result<TransportConnection, TransportError> {
        assert_eq!(url, URL);
        self.opens.fetch_add(1, Ordering::SeqCst);

        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (to_server, inbox) = mpsc::unbounded::<String>();
        let (outbox, from_server) = mpsc::unbounded::<Result<String, TransportError>>();

        let journal = Arc::clone(&self.journal);
        let sink = to_server
            .sink_map_err(|e| TransportError::Send(e.to_string()))
            .with(move |text: String| {
                journal.lock().push(format!("sent {text}"));
                future::ready(Ok::<_, TransportError>(text))
            });

        self.accepted
            .unbounded_send(ServerEnd { inbox, outbox })
            .map_err(|_| TransportError::Connect("test server gone".to_string()))?;

        Ok(TransportConnection::new(sink, from_server))
    }
}

/// Client over a fresh in-memory transport.
pub fn client(
    max_attempts: u32,
) -> (
    MarketStreamClient,
    MemoryTransport,
    mpsc::UnboundedReceiver<ServerEnd>,
) {
    let (transport, accepted) = MemoryTransport::new();
    let config = ClientConfig::new(URL)
        .with_reconnect(ReconnectConfig::default().with_max_attempts(max_attempts));
    let client = MarketStreamClient::new(config, transport.clone());
    (client, transport, accepted)
}

/// Wait for the next accepted connection.
pub async fn accept(accepted: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    tokio::time::timeout(Duration::from_secs(300), accepted.next())
        .await
        .expect("timed out waiting for a connection")
        .expect("transport dropped")
}

/// Wait for the first event matching `pred`, skipping others.
pub async fn wait_for(
    events: &mut broadcast::Receiver<ClientEvent>,
    pred: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(300), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wait until the client reports `Connected`.
pub async fn connected(events: &mut broadcast::Receiver<ClientEvent>) -> usize {
    match wait_for(events, |e| matches!(e, ClientEvent::Connected { .. })).await {
        ClientEvent::Connected { replayed } => replayed,
        _ => unreachable!(),
    }
}

/// Poll `cond` until it holds, letting the client's tasks run in between.
pub async fn eventually(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Let spawned tasks run without advancing past any retry delay.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
