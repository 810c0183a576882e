//! Control-channel state machine
//!
//! [`Session`] is driven by four entry points that mirror what a transport
//! reports: [`on_open`](Session::on_open), [`on_frame`](Session::on_frame),
//! [`on_transport_error`](Session::on_transport_error) and
//! [`on_transport_closed`](Session::on_transport_closed). It never blocks
//! and owns no timers; everything it wants to say goes through its
//! [`ControlChannel`].
//!
//! ```text
//! Idle ──open──▶ LoginSent ──MSG_LOGIN "v…"──▶ WaitForTestIds
//!                  │  ▲ SRV_QUEUE                 │ MSG_LOGIN "ids"
//!                  └──┘                           ▼
//!        Closed ◀──MSG_LOGOUT── WaitForResults ◀── TestsRunning
//! ```
//!
//! Every error moves the session to `Failed`; nothing is retried.

use bytes::Bytes;
use ndt_core::{codec, Message, MessageType, SrvQueueStatus, TestKind};
use ndt_transport::TransportError;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::channel::ControlChannel;
use crate::config::SessionConfig;
use crate::error::{ClientError, ProtocolError, Result};
use crate::result::SessionResult;
use crate::runner::{PhaseContext, PhaseStatus, RunnerFactory, StandardRunners, TestPhaseRunner};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    LoginSent,
    WaitForTestIds,
    TestsRunning,
    WaitForResults,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    pub fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::LoginSent => "LOGIN_SENT",
            SessionState::WaitForTestIds => "WAIT_FOR_TEST_IDS",
            SessionState::TestsRunning => "TESTS_RUNNING",
            SessionState::WaitForResults => "WAIT_FOR_RESULTS",
            SessionState::Closed => "CLOSED",
            SessionState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One NDT control session
pub struct Session<C: ControlChannel> {
    config: SessionConfig,
    channel: C,
    factory: Box<dyn RunnerFactory>,
    state: SessionState,
    /// Announced tests not yet started, in announced order
    pending: VecDeque<TestKind>,
    active: Option<Box<dyn TestPhaseRunner>>,
    result: SessionResult,
    failure: Option<ClientError>,
}

impl<C: ControlChannel> Session<C> {
    pub fn new(config: SessionConfig, channel: C, factory: impl RunnerFactory + 'static) -> Self {
        Self {
            config,
            channel,
            factory: Box::new(factory),
            state: SessionState::Idle,
            pending: VecDeque::new(),
            active: None,
            result: SessionResult::default(),
            failure: None,
        }
    }

    /// Session using the built-in runners
    pub fn with_standard_runners(config: SessionConfig, channel: C) -> Self {
        Self::new(config, channel, StandardRunners::new())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn result(&self) -> &SessionResult {
        &self.result
    }

    pub fn into_result(self) -> SessionResult {
        self.result
    }

    /// The error that moved the session to `Failed`
    pub fn failure(&self) -> Option<&ClientError> {
        self.failure.as_ref()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Tests announced but not yet started
    pub fn pending_tests(&self) -> impl Iterator<Item = TestKind> + '_ {
        self.pending.iter().copied()
    }

    pub fn active_test(&self) -> Option<TestKind> {
        self.active.as_ref().map(|runner| runner.kind())
    }

    /// Transport is up: send the extended login
    pub fn on_open(&mut self) -> Result<()> {
        self.ensure_live()?;
        if self.state != SessionState::Idle {
            warn!("Transport reported open again in {}, ignoring", self.state);
            return Ok(());
        }

        let frame = codec::encode_login(&self.config.server_version, &self.config.tests)
            .map_err(|source| ClientError::Frame {
                state: self.state,
                source,
            })?;
        self.send(frame)?;
        info!(
            "Login sent (version {}, tests {})",
            self.config.server_version,
            self.config.tests.login_mask()
        );
        self.transition(SessionState::LoginSent);
        Ok(())
    }

    /// One complete frame arrived
    pub fn on_frame(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_live()?;
        let msg = match codec::decode(data) {
            Ok(msg) => msg,
            Err(source) => {
                return self.fail(ClientError::Frame {
                    state: self.state,
                    source,
                })
            }
        };
        debug!("Received {} in {}: {:?}", msg.msg_type, self.state, msg.text());

        match self.state {
            SessionState::LoginSent => self.on_login_sent(msg),
            SessionState::WaitForTestIds => self.on_wait_for_test_ids(msg),
            SessionState::TestsRunning => self.on_tests_running(msg),
            SessionState::WaitForResults => self.on_wait_for_results(msg),
            _ => self.unexpected(&msg),
        }
    }

    /// The transport reported an error
    pub fn on_transport_error(&mut self, source: TransportError) -> Result<()> {
        self.ensure_live()?;
        self.fail(ClientError::Transport {
            state: self.state,
            source,
        })
    }

    /// The transport closed
    pub fn on_transport_closed(&mut self) -> Result<()> {
        match self.state {
            SessionState::Closed => Ok(()),
            SessionState::Failed => self.ensure_live(),
            SessionState::WaitForResults => {
                info!("Server closed the control channel after results");
                self.transition(SessionState::Closed);
                Ok(())
            }
            state => self.fail(ClientError::Transport {
                state,
                source: TransportError::ConnectionClosed,
            }),
        }
    }

    fn on_login_sent(&mut self, msg: Message) -> Result<()> {
        match msg.msg_type {
            MessageType::SrvQueue => self.on_srv_queue(msg.text()),
            MessageType::Login => {
                let version = msg.text();
                if !version.starts_with('v') {
                    return self.fail(
                        ProtocolError::BadLoginResponse {
                            msg: version.to_string(),
                        }
                        .into(),
                    );
                }
                info!("Server version {}", version);
                self.result.server_version = Some(version.to_string());
                self.transition(SessionState::WaitForTestIds);
                Ok(())
            }
            _ => self.unexpected(&msg),
        }
    }

    fn on_srv_queue(&mut self, status: &str) -> Result<()> {
        match SrvQueueStatus::parse(status) {
            SrvQueueStatus::StartsNow => {
                info!("Server ready, test starting");
                Ok(())
            }
            SrvQueueStatus::Heartbeat => {
                debug!("Queue heartbeat, answering MSG_WAITING");
                let frame = codec::encode_message(MessageType::Waiting, "").map_err(|source| {
                    ClientError::Frame {
                        state: self.state,
                        source,
                    }
                })?;
                self.send(frame)
            }
            SrvQueueStatus::ServerFault => self.fail(
                ProtocolError::ServerFault {
                    status: status.to_string(),
                }
                .into(),
            ),
            busy @ (SrvQueueStatus::ServerBusy | SrvQueueStatus::ServerBusy60s) => self.fail(
                ProtocolError::ServerBusy {
                    status: status.to_string(),
                    retry_after: busy.retry_after(),
                }
                .into(),
            ),
            SrvQueueStatus::Wait(Some(minutes)) => {
                info!("Queued, about {} minute(s) to wait", minutes);
                Ok(())
            }
            SrvQueueStatus::Wait(None) => {
                info!("Queued, server sent wait notice {:?}", status);
                Ok(())
            }
        }
    }

    fn on_wait_for_test_ids(&mut self, msg: Message) -> Result<()> {
        if msg.msg_type != MessageType::Login {
            return self.unexpected(&msg);
        }

        let mut announced = VecDeque::new();
        for id in msg.text().split_whitespace() {
            match TestKind::from_id(id) {
                Some(kind) => announced.push_back(kind),
                None => {
                    return self.fail(ProtocolError::UnsupportedTestId { id: id.to_string() }.into())
                }
            }
        }
        info!("Server will run {} test(s): {:?}", announced.len(), announced);
        self.pending = announced;
        self.start_next();
        Ok(())
    }

    fn on_tests_running(&mut self, msg: Message) -> Result<()> {
        let Some(runner) = self.active.as_mut() else {
            return self.unexpected(&msg);
        };
        let kind = runner.kind();

        let mut ctx = PhaseContext::new(&mut self.channel, &self.config);
        let status = match runner.on_message(&msg, &mut ctx) {
            Ok(status) => status,
            Err(e) => return self.fail(e),
        };

        match status {
            PhaseStatus::Running => Ok(()),
            PhaseStatus::Done(outcome) => {
                debug!("{} finished with {:?}", kind, outcome);
                self.result.merge_outcome(kind, outcome);
                self.start_next();
                Ok(())
            }
            PhaseStatus::Failed(reason) => {
                self.fail(ProtocolError::SubtestFailed { kind, reason }.into())
            }
        }
    }

    fn on_wait_for_results(&mut self, msg: Message) -> Result<()> {
        match msg.msg_type {
            MessageType::Results => {
                self.result.merge_results(msg.text());
                Ok(())
            }
            MessageType::Logout => {
                if let Err(source) = self.channel.close() {
                    return self.fail(ClientError::Transport {
                        state: self.state,
                        source,
                    });
                }
                info!("Logout received, session complete");
                self.transition(SessionState::Closed);
                Ok(())
            }
            _ => self.unexpected(&msg),
        }
    }

    /// Activate the next announced test, or wait for results
    fn start_next(&mut self) {
        match self.pending.pop_front() {
            Some(kind) => {
                info!("Starting {} test", kind);
                self.active = Some(self.factory.runner(kind));
                self.transition(SessionState::TestsRunning);
            }
            None => {
                self.active = None;
                self.transition(SessionState::WaitForResults);
            }
        }
    }

    fn send(&mut self, frame: Bytes) -> Result<()> {
        match self.channel.send(frame) {
            Ok(()) => Ok(()),
            Err(source) => self.fail(ClientError::Transport {
                state: self.state,
                source,
            }),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(ProtocolError::SessionTerminated { state: self.state }.into());
        }
        Ok(())
    }

    fn unexpected(&mut self, msg: &Message) -> Result<()> {
        self.fail(
            ProtocolError::UnexpectedStateTransition {
                state: self.state,
                msg_type: msg.msg_type,
            }
            .into(),
        )
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("{} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Move to `Failed`, close the channel and hand back the error
    fn fail<T>(&mut self, err: ClientError) -> Result<T> {
        error!("Session failed in {}: {}", self.state, err);
        self.pending.clear();
        self.active = None;
        if let Err(e) = self.channel.close() {
            debug!("Close after failure: {}", e);
        }
        self.transition(SessionState::Failed);
        self.failure = Some(err.clone());
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Outbound, Outbox};

    fn frame(msg_type: MessageType, msg: &str) -> Bytes {
        codec::encode_message(msg_type, msg).unwrap()
    }

    fn logged_in() -> Session<Outbox> {
        let mut session = Session::with_standard_runners(SessionConfig::default(), Outbox::new());
        session.on_open().unwrap();
        session.channel_mut().drain();
        session
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::WaitForTestIds.to_string(), "WAIT_FOR_TEST_IDS");
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::TestsRunning.is_terminal());
    }

    #[test]
    fn test_open_sends_login() {
        let mut session = Session::with_standard_runners(SessionConfig::default(), Outbox::new());
        session.on_open().unwrap();

        assert_eq!(session.state(), SessionState::LoginSent);
        let sent = session.channel_mut().drain();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Outbound::Frame(data) => {
                assert_eq!(&data[..3], &[11, 0, 29]);
                assert_eq!(&data[3..], br#"{"msg":"v3.5.5","tests":"54"}"#);
            }
            other => panic!("expected login frame, got {:?}", other),
        }
    }

    #[test]
    fn test_queue_wait_notice_keeps_state() {
        let mut session = logged_in();
        session.on_frame(&frame(MessageType::SrvQueue, "0")).unwrap();
        session.on_frame(&frame(MessageType::SrvQueue, "3")).unwrap();

        assert_eq!(session.state(), SessionState::LoginSent);
        assert!(session.channel().is_empty());
    }

    #[test]
    fn test_decode_error_tagged_with_state() {
        let mut session = logged_in();
        let err = session.on_frame(&[]).unwrap_err();

        assert_eq!(err.state(), Some(SessionState::LoginSent));
        assert!(matches!(err, ClientError::Frame { .. }));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.failure(), Some(&err));
    }

    #[test]
    fn test_frame_before_open_is_unexpected() {
        let mut session = Session::with_standard_runners(SessionConfig::default(), Outbox::new());
        let err = session.on_frame(&frame(MessageType::SrvQueue, "0")).unwrap_err();
        assert_eq!(
            err,
            ClientError::Protocol(ProtocolError::UnexpectedStateTransition {
                state: SessionState::Idle,
                msg_type: MessageType::SrvQueue,
            })
        );
    }
}
