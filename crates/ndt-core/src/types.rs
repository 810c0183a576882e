//! Protocol types and message definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::EXTENDED_LOGIN_FLAG;

/// Control message type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    CommFailure = 0,
    SrvQueue = 1,
    Login = 2,
    TestPrepare = 3,
    TestStart = 4,
    TestMsg = 5,
    TestFinalize = 6,
    Error = 7,
    Results = 8,
    Logout = 9,
    Waiting = 10,
    ExtendedLogin = 11,
}

impl MessageType {
    /// All message types in code order
    pub const ALL: [MessageType; 12] = [
        MessageType::CommFailure,
        MessageType::SrvQueue,
        MessageType::Login,
        MessageType::TestPrepare,
        MessageType::TestStart,
        MessageType::TestMsg,
        MessageType::TestFinalize,
        MessageType::Error,
        MessageType::Results,
        MessageType::Logout,
        MessageType::Waiting,
        MessageType::ExtendedLogin,
    ];

    pub fn from_u8(val: u8) -> Option<Self> {
        Self::ALL.get(val as usize).copied()
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Name used on the wire documentation and in logs
    pub fn name(self) -> &'static str {
        match self {
            MessageType::CommFailure => "COMM_FAILURE",
            MessageType::SrvQueue => "SRV_QUEUE",
            MessageType::Login => "MSG_LOGIN",
            MessageType::TestPrepare => "TEST_PREPARE",
            MessageType::TestStart => "TEST_START",
            MessageType::TestMsg => "TEST_MSG",
            MessageType::TestFinalize => "TEST_FINALIZE",
            MessageType::Error => "MSG_ERROR",
            MessageType::Results => "MSG_RESULTS",
            MessageType::Logout => "MSG_LOGOUT",
            MessageType::Waiting => "MSG_WAITING",
            MessageType::ExtendedLogin => "MSG_EXTENDED_LOGIN",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// JSON envelope carried in every frame payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub msg: String,
    /// Only written by the extended login message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<String>,
}

impl MessageBody {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            tests: None,
        }
    }

    pub fn with_tests(mut self, tests: impl Into<String>) -> Self {
        self.tests = Some(tests.into());
        self
    }
}

/// A decoded control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    pub body: MessageBody,
}

impl Message {
    pub fn new(msg_type: MessageType, msg: impl Into<String>) -> Self {
        Self {
            msg_type,
            body: MessageBody::new(msg),
        }
    }

    /// The `msg` field of the body
    pub fn text(&self) -> &str {
        &self.body.msg
    }
}

/// Sub-tests this client can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    /// Client-to-server throughput (upload)
    C2s,
    /// Server-to-client throughput (download)
    S2c,
    /// Client metadata exchange
    Meta,
}

impl TestKind {
    pub const ALL: [TestKind; 3] = [TestKind::C2s, TestKind::S2c, TestKind::Meta];

    /// Numeric id used in the server's test announcement
    pub fn id(self) -> u32 {
        match self {
            TestKind::C2s => 2,
            TestKind::S2c => 4,
            TestKind::Meta => 32,
        }
    }

    /// Bit in the desired-tests mask
    pub fn bit(self) -> u32 {
        self.id()
    }

    /// Look up a kind from one announced id token
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "2" => Some(TestKind::C2s),
            "4" => Some(TestKind::S2c),
            "32" => Some(TestKind::Meta),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TestKind::C2s => "c2s",
            TestKind::S2c => "s2c",
            TestKind::Meta => "meta",
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c2s" | "upload" => Ok(TestKind::C2s),
            "s2c" | "download" => Ok(TestKind::S2c),
            "meta" => Ok(TestKind::Meta),
            other => Err(format!("unknown test kind: {}", other)),
        }
    }
}

/// Set of requested sub-tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSet(BTreeSet<TestKind>);

impl TestSet {
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, kind: TestKind) {
        self.0.insert(kind);
    }

    pub fn with(mut self, kind: TestKind) -> Self {
        self.insert(kind);
        self
    }

    pub fn contains(&self, kind: TestKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = TestKind> + '_ {
        self.0.iter().copied()
    }

    /// Wire value for the extended login `tests` field.
    ///
    /// The extended-login flag is always set and never names a test.
    pub fn login_mask(&self) -> u32 {
        self.iter().fold(EXTENDED_LOGIN_FLAG, |mask, kind| mask | kind.bit())
    }
}

impl Default for TestSet {
    fn default() -> Self {
        TestKind::ALL.into_iter().collect()
    }
}

impl FromIterator<TestKind> for TestSet {
    fn from_iter<I: IntoIterator<Item = TestKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Meaning of a SRV_QUEUE body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrvQueueStatus {
    /// "0": the session starts now
    StartsNow,
    /// "9977": the server hit an internal fault
    ServerFault,
    /// "9987": the server is busy
    ServerBusy,
    /// "9990": keep-alive, must be answered with MSG_WAITING
    Heartbeat,
    /// "9999": the server is busy for about a minute
    ServerBusy60s,
    /// Any other body: estimated wait in minutes, when numeric
    Wait(Option<u32>),
}

impl SrvQueueStatus {
    pub fn parse(msg: &str) -> Self {
        match msg.trim() {
            "0" => SrvQueueStatus::StartsNow,
            "9977" => SrvQueueStatus::ServerFault,
            "9987" => SrvQueueStatus::ServerBusy,
            "9990" => SrvQueueStatus::Heartbeat,
            "9999" => SrvQueueStatus::ServerBusy60s,
            other => SrvQueueStatus::Wait(other.parse().ok()),
        }
    }

    /// How long the server asked us to stay away, for busy statuses
    pub fn retry_after(self) -> Option<Duration> {
        match self {
            SrvQueueStatus::ServerBusy60s => Some(Duration::from_secs(60)),
            _ => None,
        }
    }
}
