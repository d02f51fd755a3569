#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Stream Client - Real-time Market Data over WebSocket
//!
//! Keeps one WebSocket connection to the market feed alive, remembers which
//! symbols the application wants, replays them after every reconnect, and
//! routes typed inbound messages to registered handlers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and state
//!   - `symbol`: Canonical uppercase symbols
//!   - `subscription`: The set of wanted symbols
//!   - `connection`: Connection state machine and backoff policy
//!   - `messages`: Inbound and outbound frame shapes
//!
//! - **Application**: Ports and routing
//!   - `ports`: The transport interface
//!   - `dispatcher`: Message type → handler fan-out
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stream`: WebSocket transport, frame codec, and the client facade
//!   - `config`: Configuration from the environment
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!                   subscribe / unsubscribe
//!   Application ─────────────────────────────► Registry ──(replay on open)──┐
//!        ▲                                                                  ▼
//!        │ handlers       ┌────────────┐   text frames   ┌──────────────────────┐
//!        └─────────────── │ Dispatcher │ ◄────────────── │  Session task (ws)   │ ◄──► server
//!                         └────────────┘                 └──────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Port definitions and message routing.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{
    ConnectionInput, ConnectionMachine, ConnectionState, Directive, ReconnectConfig,
    ReconnectPolicy,
};
pub use domain::messages::{
    InboundFrame, MessageType, OutboundFrame, ServerError, StockUpdate, SubscriptionAck,
};
pub use domain::subscription::SubscriptionRegistry;
pub use domain::symbol::{Symbol, SymbolError};

// Application
pub use application::dispatcher::{DispatchReport, Dispatcher, MessageHandler};
pub use application::ports::{
    FrameSink, FrameStream, Transport, TransportConnection, TransportError,
};

// Client
pub use infrastructure::stream::{
    ClientEvent, CodecError, DisconnectReason, FrameCodec, MarketStreamClient, WebSocketTransport,
};

// Infrastructure config
pub use infrastructure::config::{AppConfig, ClientConfig, ConfigError, TelemetryConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryError, TelemetryGuard, init as init_telemetry};
