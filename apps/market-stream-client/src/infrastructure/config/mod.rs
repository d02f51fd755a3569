//! Configuration Module
//!
//! Client, application, and telemetry settings, loaded from environment
//! variables.

mod settings;

pub use settings::{AppConfig, ClientConfig, ConfigError, TelemetryConfig};
