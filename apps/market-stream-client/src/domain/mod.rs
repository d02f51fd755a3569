//! Domain Layer - Core market stream types and state.
//!
//! Pure Rust types with no I/O: symbols, the subscription registry, the
//! connection state machine, and the wire message shapes.

/// Reconnection state machine and backoff policy.
pub mod connection;

/// Inbound and outbound message types.
pub mod messages;

/// Subscription registry replayed on every connection.
pub mod subscription;

/// Canonical instrument symbols.
pub mod symbol;
