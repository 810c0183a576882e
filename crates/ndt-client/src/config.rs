//! Session and client configuration

use ndt_core::{TestSet, DEFAULT_PATH, DEFAULT_PORT, SERVER_VERSION};
use std::time::Duration;

/// Meta key carrying the client application name
pub const META_CLIENT_APPLICATION: &str = "client.application";
/// Meta key carrying the client version
pub const META_CLIENT_VERSION: &str = "client.version";

/// Default connection establishment timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable per-session settings
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Version string sent at login
    pub server_version: String,
    /// Sub-tests requested from the server
    pub tests: TestSet,
    /// Key/value pairs sent during the META test, in order
    pub meta: Vec<(String, String)>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_version: SERVER_VERSION.to_string(),
            tests: TestSet::default(),
            meta: vec![
                (META_CLIENT_APPLICATION.to_string(), "ndt-rs".to_string()),
                (
                    META_CLIENT_VERSION.to_string(),
                    env!("CARGO_PKG_VERSION").to_string(),
                ),
            ],
        }
    }
}

impl SessionConfig {
    /// Set a meta entry, replacing an existing value for the same key
    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.meta.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.meta.push((key, value)),
        }
    }
}

/// Transport target plus session settings
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Use `wss://`
    pub secure: bool,
    /// Bounds connection establishment only
    pub connect_timeout: Duration,
    pub session: SessionConfig,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            secure: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session: SessionConfig::default(),
        }
    }

    /// Control-channel URL for this target
    pub fn url(&self) -> ndt_transport::Result<String> {
        ndt_transport::control_url(&self.host, self.port, &self.path, self.secure)
    }
}
