//! Outbound side of the control channel as seen by the session engine

use bytes::Bytes;
use ndt_core::{codec, MessageType};
use ndt_transport::TransportError;
use std::collections::VecDeque;

/// Write capability over the control connection.
///
/// The session owns the only instance and lends it to one test runner at a
/// time, so two writers never interleave.
pub trait ControlChannel: Send {
    /// Queue one encoded frame for sending
    fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Close the connection
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Something the engine asked the transport to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Bytes),
    Close,
}

/// Ordered buffer of outbound actions.
///
/// The async driver drains it after every inbound event; tests inspect it
/// directly.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<Outbound>,
    closed: bool,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything queued so far, in order
    pub fn drain(&mut self) -> Vec<Outbound> {
        self.queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl ControlChannel for Outbox {
    fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.queue.push_back(Outbound::Frame(frame));
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.queue.push_back(Outbound::Close);
        }
        Ok(())
    }
}

/// Encode and send a message with a `msg` body
pub(crate) fn send_message(
    channel: &mut dyn ControlChannel,
    msg_type: MessageType,
    msg: &str,
) -> crate::Result<()> {
    let state = crate::SessionState::TestsRunning;
    let frame = codec::encode_message(msg_type, msg)
        .map_err(|source| crate::ClientError::Frame { state, source })?;
    channel
        .send(frame)
        .map_err(|source| crate::ClientError::Transport { state, source })
}
