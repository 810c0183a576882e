//! Test-phase runners
//!
//! Once the server announces its test ids, the session hands every control
//! message to exactly one runner at a time. A runner follows its sub-test's
//! PREPARE / START / MSG / FINALIZE sequence and reports a [`PhaseStatus`].
//! The session writes a finished runner's [`PhaseOutcome`] into the
//! [`SessionResult`](crate::SessionResult).
//!
//! Runners never touch the measurement sockets themselves; the C2S and S2C
//! runners notify a [`DataPlane`] which owns them.

use ndt_core::{Message, MessageType, TestKind};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::channel::{send_message, ControlChannel};
use crate::config::SessionConfig;
use crate::error::Result;

/// What a runner sees of the session while handling one message
pub struct PhaseContext<'a> {
    channel: &'a mut dyn ControlChannel,
    config: &'a SessionConfig,
}

impl<'a> PhaseContext<'a> {
    pub fn new(channel: &'a mut dyn ControlChannel, config: &'a SessionConfig) -> Self {
        Self { channel, config }
    }

    pub fn config(&self) -> &SessionConfig {
        self.config
    }

    /// Send a control message with a `msg` body
    pub fn send(&mut self, msg_type: MessageType, msg: &str) -> Result<()> {
        send_message(&mut *self.channel, msg_type, msg)
    }
}

/// A completed runner's contribution to the session result
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhaseOutcome {
    /// Client-to-server throughput in kbit/s
    UploadRate(f64),
    /// Server-to-client throughput in kbit/s
    DownloadRate(f64),
    MetaAccepted,
}

/// Runner state after handling one message
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseStatus {
    Running,
    Done(PhaseOutcome),
    Failed(String),
}

/// Executes one sub-test once dispatched
pub trait TestPhaseRunner: Send {
    fn kind(&self) -> TestKind;

    fn on_message(&mut self, msg: &Message, ctx: &mut PhaseContext<'_>) -> Result<PhaseStatus>;
}

/// Builds one runner per dequeued test
pub trait RunnerFactory: Send {
    fn runner(&mut self, kind: TestKind) -> Box<dyn TestPhaseRunner>;
}

/// Owner of the measurement connections for C2S and S2C.
///
/// All methods have no-op defaults so an implementation only overrides what
/// it measures.
pub trait DataPlane: Send + Sync {
    /// Server announced the measurement port for `kind`
    fn prepare(&self, _kind: TestKind, _port: Option<u16>) {}

    /// Server is ready; start moving bytes
    fn start(&self, _kind: TestKind) {}

    /// Throughput observed locally, in kbit/s
    fn measured_kbps(&self, _kind: TestKind) -> Option<f64> {
        None
    }
}

/// Data plane that measures nothing; rates come from the server
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDataPlane;

impl DataPlane for NoDataPlane {}

/// Built-in runners for every [`TestKind`]
#[derive(Clone)]
pub struct StandardRunners {
    data_plane: Arc<dyn DataPlane>,
}

impl StandardRunners {
    pub fn new() -> Self {
        Self {
            data_plane: Arc::new(NoDataPlane),
        }
    }

    pub fn with_data_plane(data_plane: Arc<dyn DataPlane>) -> Self {
        Self { data_plane }
    }
}

impl Default for StandardRunners {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerFactory for StandardRunners {
    fn runner(&mut self, kind: TestKind) -> Box<dyn TestPhaseRunner> {
        match kind {
            TestKind::Meta => Box::new(MetaRunner::new()),
            TestKind::C2s | TestKind::S2c => {
                Box::new(ThroughputRunner::new(kind, Arc::clone(&self.data_plane)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitPrepare,
    AwaitStart,
    Active,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::AwaitPrepare => "awaiting TEST_PREPARE",
            Phase::AwaitStart => "awaiting TEST_START",
            Phase::Active => "active",
        };
        f.write_str(name)
    }
}

fn unexpected(msg: &Message, phase: Phase) -> PhaseStatus {
    PhaseStatus::Failed(format!("unexpected {} while {}", msg.msg_type, phase))
}

// ============================================================================
// META
// ============================================================================

/// Sends the configured client metadata
#[derive(Debug)]
pub struct MetaRunner {
    phase: Phase,
}

impl MetaRunner {
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitPrepare,
        }
    }
}

impl Default for MetaRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPhaseRunner for MetaRunner {
    fn kind(&self) -> TestKind {
        TestKind::Meta
    }

    fn on_message(&mut self, msg: &Message, ctx: &mut PhaseContext<'_>) -> Result<PhaseStatus> {
        match (self.phase, msg.msg_type) {
            (Phase::AwaitPrepare, MessageType::TestPrepare) => {
                self.phase = Phase::AwaitStart;
                Ok(PhaseStatus::Running)
            }
            (Phase::AwaitStart, MessageType::TestStart) => {
                let entries: Vec<String> = ctx
                    .config()
                    .meta
                    .iter()
                    .map(|(key, value)| format!("{}:{}", key, value))
                    .collect();
                for entry in &entries {
                    ctx.send(MessageType::TestMsg, entry)?;
                }
                // Empty TEST_MSG terminates the list
                ctx.send(MessageType::TestMsg, "")?;
                debug!("Sent {} meta entries", entries.len());
                self.phase = Phase::Active;
                Ok(PhaseStatus::Running)
            }
            (Phase::Active, MessageType::TestFinalize) => {
                info!("META test finished");
                Ok(PhaseStatus::Done(PhaseOutcome::MetaAccepted))
            }
            (phase, _) => Ok(unexpected(msg, phase)),
        }
    }
}

// ============================================================================
// C2S / S2C
// ============================================================================

/// Control side of a throughput test
pub struct ThroughputRunner {
    kind: TestKind,
    phase: Phase,
    data_plane: Arc<dyn DataPlane>,
    server_kbps: Option<f64>,
    client_kbps: Option<f64>,
}

impl ThroughputRunner {
    /// `kind` must be C2S or S2C
    pub fn new(kind: TestKind, data_plane: Arc<dyn DataPlane>) -> Self {
        Self {
            kind,
            phase: Phase::AwaitPrepare,
            data_plane,
            server_kbps: None,
            client_kbps: None,
        }
    }

    fn on_test_msg(&mut self, msg: &Message, ctx: &mut PhaseContext<'_>) -> Result<PhaseStatus> {
        match (self.kind, self.server_kbps) {
            (TestKind::S2c, Some(_)) => {
                // After the rate exchange the server streams its variables
                debug!("S2C server variables: {}", msg.text());
                Ok(PhaseStatus::Running)
            }
            (_, Some(_)) => {
                debug!("Ignoring extra {} TEST_MSG: {}", self.kind, msg.text());
                Ok(PhaseStatus::Running)
            }
            (kind, None) => {
                let Some(server_kbps) = parse_kbps(msg.text()) else {
                    return Ok(PhaseStatus::Failed(format!(
                        "server sent invalid throughput {:?}",
                        msg.text()
                    )));
                };
                self.server_kbps = Some(server_kbps);
                debug!("{} server throughput: {} kbps", kind, server_kbps);

                if kind == TestKind::S2c {
                    let client_kbps = self
                        .data_plane
                        .measured_kbps(kind)
                        .unwrap_or(server_kbps);
                    ctx.send(MessageType::TestMsg, &client_kbps.to_string())?;
                    self.client_kbps = Some(client_kbps);
                }
                Ok(PhaseStatus::Running)
            }
        }
    }

    fn finish(&self) -> PhaseStatus {
        let outcome = match self.kind {
            TestKind::S2c => self.client_kbps.map(PhaseOutcome::DownloadRate),
            _ => self.server_kbps.map(PhaseOutcome::UploadRate),
        };
        match outcome {
            Some(outcome) => {
                info!("{} test finished: {:?}", self.kind, outcome);
                PhaseStatus::Done(outcome)
            }
            None => PhaseStatus::Failed("finalized before any throughput was reported".to_string()),
        }
    }
}

impl TestPhaseRunner for ThroughputRunner {
    fn kind(&self) -> TestKind {
        self.kind
    }

    fn on_message(&mut self, msg: &Message, ctx: &mut PhaseContext<'_>) -> Result<PhaseStatus> {
        match (self.phase, msg.msg_type) {
            (Phase::AwaitPrepare, MessageType::TestPrepare) => {
                let port = msg
                    .text()
                    .split_whitespace()
                    .next()
                    .and_then(|p| p.parse::<u16>().ok());
                debug!("{} prepare, port {:?}", self.kind, port);
                self.data_plane.prepare(self.kind, port);
                self.phase = Phase::AwaitStart;
                Ok(PhaseStatus::Running)
            }
            (Phase::AwaitStart, MessageType::TestStart) => {
                self.data_plane.start(self.kind);
                self.phase = Phase::Active;
                Ok(PhaseStatus::Running)
            }
            (Phase::Active, MessageType::TestMsg) => self.on_test_msg(msg, ctx),
            (Phase::Active, MessageType::TestFinalize) => Ok(self.finish()),
            (phase, _) => Ok(unexpected(msg, phase)),
        }
    }
}

/// Leading rate of a throughput TEST_MSG; any further fields are ignored
fn parse_kbps(text: &str) -> Option<f64> {
    text.split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .filter(|kbps| kbps.is_finite() && *kbps >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Outbound, Outbox};
    use ndt_core::codec;
    use parking_lot::Mutex;

    fn feed(
        runner: &mut dyn TestPhaseRunner,
        outbox: &mut Outbox,
        config: &SessionConfig,
        msg_type: MessageType,
        text: &str,
    ) -> PhaseStatus {
        let mut ctx = PhaseContext::new(outbox, config);
        runner
            .on_message(&Message::new(msg_type, text), &mut ctx)
            .unwrap()
    }

    fn sent(outbox: &mut Outbox) -> Vec<Message> {
        outbox
            .drain()
            .into_iter()
            .map(|out| match out {
                Outbound::Frame(data) => codec::decode(&data).unwrap(),
                Outbound::Close => panic!("runner closed the channel"),
            })
            .collect()
    }

    #[test]
    fn test_meta_sequence() {
        let config = SessionConfig::default();
        let mut outbox = Outbox::new();
        let mut runner = MetaRunner::new();

        assert_eq!(
            feed(&mut runner, &mut outbox, &config, MessageType::TestPrepare, ""),
            PhaseStatus::Running
        );
        assert!(outbox.is_empty());

        assert_eq!(
            feed(&mut runner, &mut outbox, &config, MessageType::TestStart, ""),
            PhaseStatus::Running
        );
        let msgs = sent(&mut outbox);
        assert_eq!(msgs.len(), config.meta.len() + 1);
        assert_eq!(msgs[0].text(), "client.application:ndt-rs");
        assert!(msgs.iter().all(|m| m.msg_type == MessageType::TestMsg));
        assert_eq!(msgs.last().unwrap().text(), "");

        assert_eq!(
            feed(&mut runner, &mut outbox, &config, MessageType::TestFinalize, ""),
            PhaseStatus::Done(PhaseOutcome::MetaAccepted)
        );
    }

    #[test]
    fn test_meta_out_of_order() {
        let config = SessionConfig::default();
        let mut outbox = Outbox::new();
        let mut runner = MetaRunner::new();

        let status = feed(&mut runner, &mut outbox, &config, MessageType::TestStart, "");
        assert!(matches!(status, PhaseStatus::Failed(_)));
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_c2s_uses_server_rate() {
        let config = SessionConfig::default();
        let mut outbox = Outbox::new();
        let mut runner = ThroughputRunner::new(TestKind::C2s, Arc::new(NoDataPlane));

        feed(&mut runner, &mut outbox, &config, MessageType::TestPrepare, "3002");
        feed(&mut runner, &mut outbox, &config, MessageType::TestStart, "");
        feed(&mut runner, &mut outbox, &config, MessageType::TestMsg, "8721.5");
        let status = feed(&mut runner, &mut outbox, &config, MessageType::TestFinalize, "");

        assert_eq!(status, PhaseStatus::Done(PhaseOutcome::UploadRate(8721.5)));
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_c2s_finalize_without_rate_fails() {
        let config = SessionConfig::default();
        let mut outbox = Outbox::new();
        let mut runner = ThroughputRunner::new(TestKind::C2s, Arc::new(NoDataPlane));

        feed(&mut runner, &mut outbox, &config, MessageType::TestPrepare, "3002");
        feed(&mut runner, &mut outbox, &config, MessageType::TestStart, "");
        let status = feed(&mut runner, &mut outbox, &config, MessageType::TestFinalize, "");
        assert!(matches!(status, PhaseStatus::Failed(_)));
    }

    #[test]
    fn test_c2s_bad_rate_fails() {
        let config = SessionConfig::default();
        let mut outbox = Outbox::new();
        let mut runner = ThroughputRunner::new(TestKind::C2s, Arc::new(NoDataPlane));

        feed(&mut runner, &mut outbox, &config, MessageType::TestPrepare, "3002");
        feed(&mut runner, &mut outbox, &config, MessageType::TestStart, "");
        let status = feed(&mut runner, &mut outbox, &config, MessageType::TestMsg, "fast");
        assert!(matches!(status, PhaseStatus::Failed(_)));
    }

    #[derive(Default)]
    struct RecordingPlane {
        calls: Mutex<Vec<String>>,
    }

    impl DataPlane for RecordingPlane {
        fn prepare(&self, kind: TestKind, port: Option<u16>) {
            self.calls.lock().push(format!("prepare {} {:?}", kind, port));
        }

        fn start(&self, kind: TestKind) {
            self.calls.lock().push(format!("start {}", kind));
        }

        fn measured_kbps(&self, _kind: TestKind) -> Option<f64> {
            Some(5000.0)
        }
    }

    #[test]
    fn test_s2c_notifies_data_plane() {
        let config = SessionConfig::default();
        let mut outbox = Outbox::new();
        let plane = Arc::new(RecordingPlane::default());
        let mut runner = ThroughputRunner::new(TestKind::S2c, plane.clone());

        feed(&mut runner, &mut outbox, &config, MessageType::TestPrepare, "3003");
        feed(&mut runner, &mut outbox, &config, MessageType::TestStart, "");
        assert_eq!(
            plane.calls.lock().clone(),
            vec!["prepare s2c Some(3003)".to_string(), "start s2c".to_string()]
        );

        // Rate first, then unsent queue and bytes sent
        let status = feed(&mut runner, &mut outbox, &config, MessageType::TestMsg, "6100 0 1000");
        assert_eq!(status, PhaseStatus::Running);
        assert_eq!(sent(&mut outbox)[0].text(), "5000");
    }

    #[test]
    fn test_s2c_full_exchange() {
        let config = SessionConfig::default();
        let mut outbox = Outbox::new();
        let plane = Arc::new(RecordingPlane::default());
        let mut runner = ThroughputRunner::new(TestKind::S2c, plane);

        feed(&mut runner, &mut outbox, &config, MessageType::TestPrepare, "3003");
        feed(&mut runner, &mut outbox, &config, MessageType::TestStart, "");
        feed(&mut runner, &mut outbox, &config, MessageType::TestMsg, "6100");

        let msgs = sent(&mut outbox);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].msg_type, MessageType::TestMsg);
        assert_eq!(msgs[0].text(), "5000");

        feed(&mut runner, &mut outbox, &config, MessageType::TestMsg, "CurMSS: 1448");
        assert!(outbox.is_empty());

        let status = feed(&mut runner, &mut outbox, &config, MessageType::TestFinalize, "");
        assert_eq!(status, PhaseStatus::Done(PhaseOutcome::DownloadRate(5000.0)));
    }

    #[test]
    fn test_s2c_falls_back_to_server_rate() {
        let config = SessionConfig::default();
        let mut outbox = Outbox::new();
        let mut runner = StandardRunners::new().runner(TestKind::S2c);
        assert_eq!(runner.kind(), TestKind::S2c);

        feed(runner.as_mut(), &mut outbox, &config, MessageType::TestPrepare, "3003");
        feed(runner.as_mut(), &mut outbox, &config, MessageType::TestStart, "");
        feed(runner.as_mut(), &mut outbox, &config, MessageType::TestMsg, "6100");
        assert_eq!(sent(&mut outbox)[0].text(), "6100");

        let status = feed(runner.as_mut(), &mut outbox, &config, MessageType::TestFinalize, "");
        assert_eq!(status, PhaseStatus::Done(PhaseOutcome::DownloadRate(6100.0)));
    }
}
