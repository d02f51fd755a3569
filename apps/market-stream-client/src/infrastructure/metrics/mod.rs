//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Counts of frames received, dropped and sent
//! - **Connection**: Current connection state and reconnect attempts
//! - **Subscriptions**: Wanted symbol count
//! - **Handlers**: Handler failures and dispatch latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the status server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;
use crate::domain::messages::MessageType;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frame counters
    describe_counter!(
        "market_stream_frames_received_total",
        "Total decoded frames received from the market stream"
    );
    describe_counter!(
        "market_stream_frames_dropped_total",
        "Total inbound frames dropped as malformed"
    );
    describe_counter!(
        "market_stream_frames_sent_total",
        "Total subscription intents sent to the market stream"
    );

    // Connection
    describe_gauge!(
        "market_stream_connection_state",
        "Connection state (0=disconnected, 1=connecting, 2=open, 3=retry pending, 4=permanently closed)"
    );
    describe_counter!(
        "market_stream_reconnects_total",
        "Total reconnection attempts scheduled"
    );

    // Subscriptions
    describe_gauge!(
        "market_stream_subscriptions",
        "Number of symbols currently subscribed"
    );

    // Handlers
    describe_counter!(
        "market_stream_handler_failures_total",
        "Total handler invocations that failed"
    );
    describe_histogram!(
        "market_stream_dispatch_seconds",
        "Time to run all handlers for one frame"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Label for a message type. Unrecognized tags share one label.
fn type_label(message_type: &MessageType) -> &'static str {
    match message_type {
        MessageType::StockUpdate => "stock_update",
        MessageType::PriceUpdate => "price_update",
        MessageType::Ticker => "ticker",
        MessageType::IndicatorUpdate => "indicator_update",
        MessageType::SentimentUpdate => "sentiment_update",
        MessageType::PredictionUpdate => "prediction_update",
        MessageType::NewsUpdate => "news_update",
        MessageType::Subscribed => "subscribed",
        MessageType::Unsubscribed => "unsubscribed",
        MessageType::Error => "error",
        MessageType::Unknown(_) => "unknown",
    }
}

/// Record a decoded inbound frame.
pub fn record_frame_received(message_type: &MessageType) {
    counter!(
        "market_stream_frames_received_total",
        "message_type" => type_label(message_type)
    )
    .increment(1);
}

/// Record a malformed inbound frame.
pub fn record_frame_dropped() {
    counter!("market_stream_frames_dropped_total").increment(1);
}

/// Record an outbound intent (`subscribe` or `unsubscribe`).
pub fn record_frame_sent(action: &'static str) {
    counter!("market_stream_frames_sent_total", "action" => action).increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("market_stream_connection_state").set(f64::from(state.code()));
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("market_stream_reconnects_total").increment(1);
}

/// Update the subscription count.
pub fn set_subscriptions(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("market_stream_subscriptions").set(count as f64);
}

/// Record failed handler invocations for one frame.
pub fn record_handler_failures(message_type: &MessageType, count: usize) {
    counter!(
        "market_stream_handler_failures_total",
        "message_type" => type_label(message_type)
    )
    .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record how long dispatching one frame took.
pub fn record_dispatch_duration(message_type: &MessageType, duration: Duration) {
    histogram!(
        "market_stream_dispatch_seconds",
        "message_type" => type_label(message_type)
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
