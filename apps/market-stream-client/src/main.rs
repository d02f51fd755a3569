//! Market Stream Client Binary
//!
//! Connects to the market feed, subscribes the configured symbols, and logs
//! what arrives.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `MARKET_WS_URL`: Market stream endpoint (`ws://` or `wss://`)
//!
//! ## Optional
//! - `MARKET_WS_SYMBOLS`: Comma separated symbols to subscribe at startup
//! - `MARKET_WS_RECONNECT_BASE_DELAY_MS`: First retry delay (default: 1000)
//! - `MARKET_WS_RECONNECT_DELAY_MAX_SECS`: Retry delay cap (default: 64)
//! - `MARKET_WS_RECONNECT_MULTIPLIER`: Backoff growth factor (default: 2.0)
//! - `MARKET_WS_RECONNECT_JITTER`: Jitter fraction (default: 0.0)
//! - `MARKET_WS_MAX_RECONNECT_ATTEMPTS`: Retries before giving up, 0 = unlimited (default: 5)
//! - `MARKET_WS_EVENT_CAPACITY`: Lifecycle event buffer (default: 256)
//! - `MARKET_WS_HEALTH_PORT`: Health check HTTP port, 0 = disabled (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: stockmind-market-stream-client)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use market_stream_client::infrastructure::health::{HealthServer, HealthServerState};
use market_stream_client::{
    AppConfig, ClientEvent, MarketStreamClient, MessageHandler, ServerError, StockUpdate,
    SubscriptionAck, TelemetryConfig, init_metrics, init_telemetry,
};
use serde::Deserialize;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let telemetry_config = TelemetryConfig::from_env();
    let _telemetry_guard = init_telemetry(&telemetry_config)?;
    tracing::debug!(
        service = %telemetry_config.service_name,
        otlp = telemetry_config.otlp_enabled,
        "Telemetry initialized"
    );

    tracing::info!("Starting Market Stream Client");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = AppConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let client = MarketStreamClient::with_websocket(config.client.clone());

    register_handlers(&client);

    // Log lifecycle events
    let events = client.events();
    tokio::spawn(log_events(events, shutdown_token.clone()));

    // Spawn health server
    if config.health_port == 0 {
        tracing::info!("Health server disabled");
    } else {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            client.clone(),
        ));
        let health_server =
            HealthServer::new(config.health_port, health_state, shutdown_token.clone());
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    for symbol in &config.symbols {
        client.subscribe(symbol.as_str())?;
    }
    client.connect();

    tracing::info!("Market stream client ready");

    await_shutdown(shutdown_token).await;
    client.dispose();

    tracing::info!("Market stream client stopped");
    Ok(())
}

/// Log market payloads through their typed views.
fn register_handlers(client: &MarketStreamClient) {
    let log_update = MessageHandler::new(|data| {
        let update = StockUpdate::deserialize(data)?;
        tracing::info!(
            symbol = %update.symbol,
            price = %update.price,
            change = %update.change,
            change_percent = %update.change_percent,
            volume = update.volume,
            "Market update"
        );
        Ok(())
    });
    for message_type in ["stock_update", "price_update", "ticker"] {
        client.on(message_type, log_update.clone());
    }

    client.on(
        "subscribed",
        MessageHandler::new(|data| {
            let ack = SubscriptionAck::deserialize(data)?;
            tracing::debug!(symbol = %ack.symbol, "Subscription acknowledged");
            Ok(())
        }),
    );
    client.on(
        "unsubscribed",
        MessageHandler::new(|data| {
            let ack = SubscriptionAck::deserialize(data)?;
            tracing::debug!(symbol = %ack.symbol, "Unsubscription acknowledged");
            Ok(())
        }),
    );
    client.on(
        "error",
        MessageHandler::new(|data| {
            let error = ServerError::deserialize(data)?;
            tracing::warn!(error = %error.message, "Server reported an error");
            Ok(())
        }),
    );
}

async fn log_events(
    mut events: tokio::sync::broadcast::Receiver<ClientEvent>,
    shutdown_token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown_token.cancelled() => return,
            event = events.recv() => event,
        };

        match event {
            Ok(ClientEvent::PermanentlyDisconnected { attempts }) => {
                tracing::error!(
                    attempts,
                    "Market stream gave up; restart or reconfigure to resume"
                );
            }
            Ok(event) => tracing::debug!(?event, "Client event"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Client event log lagged");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    let symbols: Vec<&str> = config.symbols.iter().map(|s| s.as_str()).collect();
    tracing::info!(
        url = %config.client.url,
        symbols = ?symbols,
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        base_delay_ms = u64::try_from(config.client.reconnect.base_delay.as_millis()).unwrap_or(u64::MAX),
        max_delay_secs = config.client.reconnect.max_delay.as_secs(),
        multiplier = config.client.reconnect.multiplier,
        jitter = config.client.reconnect.jitter_factor,
        max_attempts = config.client.reconnect.max_attempts,
        "Reconnect policy"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
