//! Market Stream
//!
//! WebSocket plumbing for the market data feed: the JSON frame codec, the
//! tungstenite transport, the per-session driver task, and the
//! [`MarketStreamClient`] facade built on top of them.

mod client;
mod codec;
mod events;
pub(crate) mod session;
mod transport;

pub use client::MarketStreamClient;
pub use codec::{CodecError, FrameCodec};
pub use events::{ClientEvent, DisconnectReason};
pub use transport::WebSocketTransport;
