//! Client Lifecycle Integration Tests
//!
//! Drives `MarketStreamClient` end-to-end over an in-memory transport:
//! connect, replay, reconnect with backoff, explicit disconnect, and
//! recovery from permanent failure.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use serde_json::json;
use tokio_test::assert_ok;

use common::{accept, connected, eventually, settle, wait_for};
use market_stream_client::{ClientEvent, ConnectionState, DisconnectReason, MessageHandler};

#[tokio::test(start_paused = true)]
async fn replay_is_sent_before_any_inbound_frame_is_dispatched() {
    let (client, transport, mut accepted) = common::client(5);
    let journal = transport.journal();

    let record = transport.journal();
    client.on(
        "stock_update",
        MessageHandler::new(move |data| {
            record.lock().push(format!("handled {}", data["symbol"]));
            Ok(())
        }),
    );

    assert_ok!(client.subscribe("msft"));
    assert_ok!(client.subscribe("aapl"));

    let mut events = client.events();
    client.connect();
    let mut server = accept(&mut accepted).await;

    // Pushed before the client has read anything.
    server.push_json(&json!({"type": "stock_update", "data": {"symbol": "AAPL"}}));

    assert_eq!(connected(&mut events).await, 2);
    assert_eq!(
        server.recv_json().await,
        json!({"type": "subscribe", "symbol": "AAPL"})
    );
    assert_eq!(
        server.recv_json().await,
        json!({"type": "subscribe", "symbol": "MSFT"})
    );

    eventually(|| journal.lock().len() == 3).await;
    let entries = journal.lock().clone();
    assert!(entries[0].starts_with("sent ") && entries[0].contains("AAPL"));
    assert!(entries[1].starts_with("sent ") && entries[1].contains("MSFT"));
    assert_eq!(entries[2], "handled \"AAPL\"");
    assert_eq!(client.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn connect_is_idempotent() {
    let (client, transport, mut accepted) = common::client(5);
    assert_ok!(client.subscribe("aapl"));

    let mut events = client.events();
    client.connect();
    client.connect();

    let mut server = accept(&mut accepted).await;
    assert_eq!(connected(&mut events).await, 1);

    client.connect();
    settle().await;

    assert_eq!(transport.opens(), 1);
    assert_eq!(
        server.recv_json().await,
        json!({"type": "subscribe", "symbol": "AAPL"})
    );
    server.assert_idle().await;
}

#[tokio::test(start_paused = true)]
async fn subscribe_while_open_sends_only_on_change() {
    let (client, _transport, mut accepted) = common::client(5);
    let mut events = client.events();
    client.connect();
    let mut server = accept(&mut accepted).await;
    assert_eq!(connected(&mut events).await, 0);

    assert!(assert_ok!(client.subscribe("nvda")));
    assert!(!assert_ok!(client.subscribe("NVDA")));
    assert_eq!(
        server.recv_json().await,
        json!({"type": "subscribe", "symbol": "NVDA"})
    );

    assert!(assert_ok!(client.unsubscribe("nvda")));
    assert!(!assert_ok!(client.unsubscribe("nvda")));
    assert_eq!(
        server.recv_json().await,
        json!({"type": "unsubscribe", "symbol": "NVDA"})
    );

    server.assert_idle().await;
    assert!(client.subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_while_offline_is_not_replayed() {
    let (client, _transport, mut accepted) = common::client(5);
    assert_ok!(client.subscribe("aapl"));
    assert_ok!(client.subscribe("msft"));
    assert!(assert_ok!(client.unsubscribe("Msft")));

    let mut events = client.events();
    client.connect();
    let mut server = accept(&mut accepted).await;

    assert_eq!(connected(&mut events).await, 1);
    assert_eq!(
        server.recv_json().await,
        json!({"type": "subscribe", "symbol": "AAPL"})
    );
    server.assert_idle().await;
}

#[tokio::test(start_paused = true)]
async fn peer_close_reconnects_and_replays_everything() {
    let (client, transport, mut accepted) = common::client(5);
    assert_ok!(client.subscribe("aapl"));

    let mut events = client.events();
    client.connect();
    let mut first = accept(&mut accepted).await;
    connected(&mut events).await;
    first.recv_json().await;

    // Added while open: sent live, and remembered for the next replay.
    assert_ok!(client.subscribe("msft"));
    assert_eq!(
        first.recv_json().await,
        json!({"type": "subscribe", "symbol": "MSFT"})
    );

    drop(first);

    assert_eq!(
        wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await,
        ClientEvent::Disconnected {
            reason: DisconnectReason::PeerClosed
        }
    );
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, ClientEvent::Reconnecting { .. })).await,
        ClientEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(1000)
        }
    );
    assert!(matches!(
        client.state(),
        ConnectionState::ClosedPendingRetry { attempt: 1, .. }
    ));

    let mut second = accept(&mut accepted).await;
    assert_eq!(connected(&mut events).await, 2);
    assert_eq!(
        second.recv_json().await,
        json!({"type": "subscribe", "symbol": "AAPL"})
    );
    assert_eq!(
        second.recv_json().await,
        json!({"type": "subscribe", "symbol": "MSFT"})
    );

    assert_eq!(transport.opens(), 2);
    assert_eq!(client.retry_attempts(), 0);
    assert_eq!(client.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn transport_errors_are_surfaced_as_events() {
    let (client, _transport, mut accepted) = common::client(5);
    let mut events = client.events();
    client.connect();
    let server = accept(&mut accepted).await;
    connected(&mut events).await;

    server.fail("reset by peer");

    let event = wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
    let ClientEvent::Disconnected {
        reason: DisconnectReason::Error(error),
    } = event
    else {
        panic!("unexpected event {event:?}");
    };
    assert!(error.contains("reset by peer"));

    // The failure is retried, not returned to anyone.
    accept(&mut accepted).await;
    connected(&mut events).await;
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_until_the_session_gives_up() {
    let (client, transport, _accepted) = common::client(3);
    transport.set_refusing(true);

    let mut events = client.events();
    client.connect();

    let mut delays = Vec::new();
    let attempts = loop {
        match wait_for(&mut events, |e| {
            matches!(
                e,
                ClientEvent::Reconnecting { .. } | ClientEvent::PermanentlyDisconnected { .. }
            )
        })
        .await
        {
            ClientEvent::Reconnecting { delay, .. } => delays.push(delay.as_millis()),
            ClientEvent::PermanentlyDisconnected { attempts } => break attempts,
            _ => unreachable!(),
        }
    };

    assert_eq!(delays, vec![1000, 2000, 4000]);
    assert_eq!(attempts, 3);
    assert_eq!(transport.opens(), 4);
    assert_eq!(client.state(), ConnectionState::ClosedPermanent);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.opens(), 4);
}

#[tokio::test(start_paused = true)]
async fn connect_after_permanent_failure_starts_over() {
    let (client, transport, mut accepted) = common::client(1);
    assert_ok!(client.subscribe("aapl"));
    transport.set_refusing(true);

    let mut events = client.events();
    client.connect();
    wait_for(&mut events, |e| {
        matches!(e, ClientEvent::PermanentlyDisconnected { .. })
    })
    .await;
    assert_eq!(client.state(), ConnectionState::ClosedPermanent);

    transport.set_refusing(false);
    client.connect();

    let mut server = accept(&mut accepted).await;
    assert_eq!(connected(&mut events).await, 1);
    assert_eq!(
        server.recv_json().await,
        json!({"type": "subscribe", "symbol": "AAPL"})
    );
    assert_eq!(client.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn connect_during_retry_wait_opens_immediately() {
    let (client, transport, mut accepted) = common::client(5);
    assert_ok!(client.subscribe("aapl"));
    transport.set_refusing(true);

    let mut events = client.events();
    client.connect();
    wait_for(&mut events, |e| matches!(e, ClientEvent::Reconnecting { .. })).await;
    assert_eq!(transport.opens(), 1);

    transport.set_refusing(false);
    let before = tokio::time::Instant::now();
    client.connect();
    assert_eq!(client.state(), ConnectionState::Connecting);

    let mut server = accept(&mut accepted).await;
    assert_eq!(connected(&mut events).await, 1);
    assert!(before.elapsed() < Duration::from_millis(1000), "waited out the retry delay");
    assert_eq!(
        server.recv_json().await,
        json!({"type": "subscribe", "symbol": "AAPL"})
    );

    // The abandoned retry never fires a second open.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.opens(), 2);
    assert_eq!(client.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn disconnect_closes_and_stays_closed() {
    let (client, transport, mut accepted) = common::client(5);
    assert_ok!(client.subscribe("aapl"));

    let mut events = client.events();
    client.connect();
    let mut server = accept(&mut accepted).await;
    connected(&mut events).await;
    server.recv_json().await;

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await,
        ClientEvent::Disconnected {
            reason: DisconnectReason::Requested
        }
    );

    // Server side sees the connection end.
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(5), futures::StreamExt::next(&mut server.inbox))
            .await
            .unwrap(),
        None
    );

    // No reconnect follows a requested disconnect.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.opens(), 1);

    // Offline changes are kept for the next session.
    assert_ok!(client.subscribe("tsla"));
    client.connect();
    let mut next = accept(&mut accepted).await;
    assert_eq!(connected(&mut events).await, 2);
    assert_eq!(
        next.recv_json().await,
        json!({"type": "subscribe", "symbol": "AAPL"})
    );
    assert_eq!(
        next.recv_json().await,
        json!({"type": "subscribe", "symbol": "TSLA"})
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_a_pending_retry() {
    let (client, transport, _accepted) = common::client(5);
    transport.set_refusing(true);

    let mut events = client.events();
    client.connect();
    wait_for(&mut events, |e| matches!(e, ClientEvent::Reconnecting { .. })).await;

    client.disconnect();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(transport.opens(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn state_changes_are_observable() {
    let (client, _transport, mut accepted) = common::client(5);
    let mut state = client.watch_state();
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);

    client.connect();
    assert_eq!(*state.borrow_and_update(), ConnectionState::Connecting);

    let _server = accept(&mut accepted).await;
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(ConnectionState::is_open))
        .await
        .unwrap()
        .unwrap();

    client.dispose();
    assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);
    assert!(client.subscriptions().is_empty());
}
