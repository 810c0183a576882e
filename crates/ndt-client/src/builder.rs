//! Client builder pattern

use ndt_core::{TestKind, TestSet};
use ndt_transport::WebSocketConfig;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::NdtClient;

/// Builder for [`NdtClient`]
pub struct NdtClientBuilder {
    config: ClientConfig,
    transport: WebSocketConfig,
}

impl NdtClientBuilder {
    /// Create a new builder for `host`
    pub fn new(host: &str) -> Self {
        Self {
            config: ClientConfig::new(host),
            transport: WebSocketConfig::default(),
        }
    }

    /// Set control port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set WebSocket resource path
    pub fn path(mut self, path: &str) -> Self {
        self.config.path = path.to_string();
        self
    }

    /// Use `wss://`
    pub fn secure(mut self, secure: bool) -> Self {
        self.config.secure = secure;
        self
    }

    /// Bound connection establishment
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the version string sent at login
    pub fn server_version(mut self, version: &str) -> Self {
        self.config.session.server_version = version.to_string();
        self
    }

    /// Replace the requested sub-tests
    pub fn tests(mut self, tests: TestSet) -> Self {
        self.config.session.tests = tests;
        self
    }

    /// Request only the given sub-tests
    pub fn only(self, kinds: &[TestKind]) -> Self {
        self.tests(kinds.iter().copied().collect())
    }

    /// Add or replace a meta entry
    pub fn meta(mut self, key: &str, value: &str) -> Self {
        self.config.session.set_meta(key, value);
        self
    }

    /// Override the WebSocket settings
    pub fn transport(mut self, transport: WebSocketConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Build the client. Nothing connects until [`NdtClient::run`].
    pub fn build(self) -> NdtClient {
        NdtClient::with_transport(self.config, self.transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let client = NdtClientBuilder::new("localhost").build();
        let config = client.config();

        assert_eq!(config.port, 3001);
        assert_eq!(config.path, "/ndt_protocol");
        assert!(!config.secure);
        assert_eq!(config.session.tests, TestSet::default());
    }

    #[test]
    fn test_builder_overrides() {
        let client = NdtClientBuilder::new("localhost")
            .port(4000)
            .path("ndt")
            .secure(true)
            .only(&[TestKind::Meta])
            .meta("client.os", "linux")
            .build();
        let config = client.config();

        assert_eq!(config.url().unwrap(), "wss://localhost:4000/ndt");
        assert_eq!(config.session.tests.login_mask(), 0x30);
        assert!(config
            .session
            .meta
            .contains(&("client.os".to_string(), "linux".to_string())));
    }
}
