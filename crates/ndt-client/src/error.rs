//! Client error types

use ndt_core::{FrameError, MessageType, TestKind};
use ndt_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

use crate::session::SessionState;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Violations of the expected control sequence
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unexpected {msg_type} in state {state}")]
    UnexpectedStateTransition {
        state: SessionState,
        msg_type: MessageType,
    },

    #[error("bad login response: {msg:?} is not a server version")]
    BadLoginResponse { msg: String },

    #[error("server offered unsupported test id {id:?}")]
    UnsupportedTestId { id: String },

    #[error("server fault while queued (SRV_QUEUE {status})")]
    ServerFault { status: String },

    #[error("server busy (SRV_QUEUE {status})")]
    ServerBusy {
        status: String,
        retry_after: Option<Duration>,
    },

    #[error("{kind} test failed: {reason}")]
    SubtestFailed { kind: TestKind, reason: String },

    #[error("session already {state}")]
    SessionTerminated { state: SessionState },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("bad frame in state {state}: {source}")]
    Frame {
        state: SessionState,
        #[source]
        source: FrameError,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error in state {state}: {source}")]
    Transport {
        state: SessionState,
        #[source]
        source: TransportError,
    },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("session ended before it was closed (state {0})")]
    Incomplete(SessionState),
}

impl ClientError {
    /// True when the server asked us to come back later.
    ///
    /// Nothing is retried here; a caller may start a new session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ClientError::Protocol(ProtocolError::ServerBusy { .. }))
    }

    /// Suggested wait before a new session, when the server gave one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ClientError::Protocol(ProtocolError::ServerBusy { retry_after, .. }) => *retry_after,
            _ => None,
        }
    }

    pub fn state(&self) -> Option<SessionState> {
        match self {
            ClientError::Frame { state, .. } | ClientError::Transport { state, .. } => Some(*state),
            ClientError::Protocol(ProtocolError::UnexpectedStateTransition { state, .. })
            | ClientError::Protocol(ProtocolError::SessionTerminated { state }) => Some(*state),
            ClientError::Incomplete(state) => Some(*state),
            _ => None,
        }
    }
}
