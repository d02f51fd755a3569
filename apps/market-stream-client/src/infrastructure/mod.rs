//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the WebSocket adapter for the transport port, the
//! client facade that drives it, and the process-level concerns around it.

/// Market stream client, codec, and WebSocket transport.
pub mod stream;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
