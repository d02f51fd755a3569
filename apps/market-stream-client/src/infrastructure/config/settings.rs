//! Client Configuration Settings
//!
//! Configuration types for the market stream client, loaded from
//! environment variables. Loading goes through a lookup function so the
//! parsing rules can be tested without touching the process environment.

use std::time::Duration;

use crate::domain::connection::ReconnectConfig;
use crate::domain::symbol::Symbol;

/// Default broadcast capacity for lifecycle events.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default port for the status server.
const DEFAULT_HEALTH_PORT: u16 = 8083;

/// Service name reported with exported spans.
const DEFAULT_SERVICE_NAME: &str = "stockmind-market-stream-client";

/// OTLP gRPC endpoint.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Log filter used when `RUST_LOG` is unset. Tungstenite logs every frame
/// at debug.
const DEFAULT_LOG_FILTER: &str = "info,tungstenite=warn,tokio_tungstenite=warn,hyper=warn";

/// Settings for one [`MarketStreamClient`](crate::MarketStreamClient).
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Market stream endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Backoff schedule for reconnects.
    pub reconnect: ReconnectConfig,
    /// Lifecycle events buffered per receiver before it lags.
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Configuration for `url` with default backoff.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Override the backoff schedule.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `MARKET_WS_URL` is missing, empty, or not a
    /// WebSocket URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup("MARKET_WS_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("MARKET_WS_URL".to_string()))?;
        let url = url.trim().to_string();

        if url.is_empty() {
            return Err(ConfigError::EmptyValue("MARKET_WS_URL".to_string()));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidEndpoint(url));
        }

        let defaults = ReconnectConfig::default();
        let reconnect = ReconnectConfig {
            base_delay: parse_duration_millis(
                &lookup,
                "MARKET_WS_RECONNECT_BASE_DELAY_MS",
                defaults.base_delay,
            ),
            max_delay: parse_duration_secs(
                &lookup,
                "MARKET_WS_RECONNECT_DELAY_MAX_SECS",
                defaults.max_delay,
            ),
            multiplier: parse_or(&lookup, "MARKET_WS_RECONNECT_MULTIPLIER", defaults.multiplier),
            jitter_factor: parse_or(&lookup, "MARKET_WS_RECONNECT_JITTER", defaults.jitter_factor)
                .clamp(0.0, 1.0),
            max_attempts: parse_or(
                &lookup,
                "MARKET_WS_MAX_RECONNECT_ATTEMPTS",
                defaults.max_attempts,
            ),
        };

        Ok(Self {
            url,
            reconnect,
            event_capacity: parse_or(&lookup, "MARKET_WS_EVENT_CAPACITY", DEFAULT_EVENT_CAPACITY)
                .max(1),
        })
    }
}

/// Complete configuration for the `market-stream-client` binary.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Client settings.
    pub client: ClientConfig,
    /// Symbols subscribed at startup.
    pub symbols: Vec<Symbol>,
    /// Status server port (0 = disabled).
    pub health_port: u16,
}

impl AppConfig {
    /// Create configuration from environment variables.
    ///
    /// Unparseable entries in `MARKET_WS_SYMBOLS` are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the client configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let client = ClientConfig::from_lookup(&lookup)?;

        let symbols = lookup("MARKET_WS_SYMBOLS")
            .map(|raw| parse_symbols(&raw))
            .unwrap_or_default();

        Ok(Self {
            client,
            symbols,
            health_port: parse_or(&lookup, "MARKET_WS_HEALTH_PORT", DEFAULT_HEALTH_PORT),
        })
    }
}

/// Logging and span export settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name for exported spans.
    pub service_name: String,
    /// Filter applied when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Whether spans are exported over OTLP.
    pub otlp_enabled: bool,
    /// OTLP gRPC endpoint.
    pub otlp_endpoint: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            otlp_enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from `OTEL_*` environment variables.
    ///
    /// Never fails: telemetry is set up before anything else and must not
    /// stop the client from starting.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            service_name: non_empty("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_filter: defaults.log_filter,
            otlp_enabled: lookup("OTEL_ENABLED").is_some_and(|v| parse_flag(&v)),
            otlp_endpoint: non_empty("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or(defaults.otlp_endpoint),
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Endpoint is not a WebSocket URL.
    #[error("invalid market stream endpoint {0:?}: expected ws:// or wss://")]
    InvalidEndpoint(String),
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_symbols(raw: &str) -> Vec<Symbol> {
    let mut symbols: Vec<Symbol> = raw
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| match Symbol::parse(s) {
            Ok(symbol) => Some(symbol),
            Err(e) => {
                tracing::warn!(entry = s, error = %e, "Ignoring invalid symbol in MARKET_WS_SYMBOLS");
                None
            }
        })
        .collect();
    symbols.sort();
    symbols.dedup();
    symbols
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
