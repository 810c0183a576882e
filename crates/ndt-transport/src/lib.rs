//! NDT Transport Layer
//!
//! Carries control frames between the client and an NDT server. The
//! control channel is a WebSocket negotiated with the `ndt` subprotocol and
//! carrying binary messages only.

pub mod error;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use traits::{Transport, TransportEvent, TransportReceiver, TransportSender};

#[cfg(feature = "websocket")]
pub use websocket::{control_url, WebSocketConfig, WebSocketReceiver, WebSocketSender, WebSocketTransport};
