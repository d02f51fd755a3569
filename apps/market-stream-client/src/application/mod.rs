//! Application Layer - Ports and message routing.
//!
//! Defines the transport port the client drives and the dispatcher that
//! routes decoded frames to registered handlers.

/// Message type → handler routing.
pub mod dispatcher;

/// Port interfaces for external systems (the transport).
pub mod ports;
