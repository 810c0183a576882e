//! NDT Core
//!
//! Message types and the binary codec for the NDT (Network Diagnostic
//! Tool) control channel.
//!
//! This crate provides:
//! - Protocol message types ([`Message`], [`MessageType`])
//! - Binary frame encoding/decoding ([`Frame`], [`codec`])
//! - Sub-test identifiers ([`TestKind`], [`TestSet`])
//! - Server queue status decoding ([`SrvQueueStatus`])

pub mod codec;
pub mod error;
pub mod frame;
pub mod types;

pub use codec::{decode, encode};
pub use error::{FrameError, Result};
pub use frame::Frame;
pub use types::*;

/// Server protocol version this client is compatible with, sent at login
pub const SERVER_VERSION: &str = "v3.5.5";

/// Bit OR'd into the login `tests` value to announce extended login
pub const EXTENDED_LOGIN_FLAG: u32 = 0x10;

/// Default control port
pub const DEFAULT_PORT: u16 = 3001;

/// Default WebSocket resource path
pub const DEFAULT_PATH: &str = "/ndt_protocol";

/// WebSocket subprotocol identifier
pub const WS_SUBPROTOCOL: &str = "ndt";
