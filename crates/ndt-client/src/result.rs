//! Session outcome

use ndt_core::TestKind;
use serde::Serialize;

use crate::runner::PhaseOutcome;

/// Everything a session learned from the server.
///
/// Only runners that reached `Done` contribute, so a rate is `None` when its
/// test was not requested, not offered, or did not finish.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionResult {
    /// Version string from the server's login reply
    pub server_version: Option<String>,
    /// Sub-tests completed, in execution order
    pub tests_run: Vec<TestKind>,
    /// Client-to-server throughput in kbit/s
    pub upload_rate: Option<f64>,
    /// Server-to-client throughput in kbit/s
    pub download_rate: Option<f64>,
    /// The server acknowledged our metadata
    pub meta_accepted: bool,
    /// `Key: value` pairs from MSG_RESULTS, in arrival order
    pub server_results: Vec<(String, String)>,
}

impl SessionResult {
    /// Record a completed runner's contribution
    pub fn merge_outcome(&mut self, kind: TestKind, outcome: PhaseOutcome) {
        self.tests_run.push(kind);
        match outcome {
            PhaseOutcome::UploadRate(kbps) => self.upload_rate = Some(kbps),
            PhaseOutcome::DownloadRate(kbps) => self.download_rate = Some(kbps),
            PhaseOutcome::MetaAccepted => self.meta_accepted = true,
        }
    }

    /// Fold one MSG_RESULTS body into `server_results`.
    ///
    /// Lines without a `:` separator are skipped.
    pub fn merge_results(&mut self, body: &str) {
        for line in body.lines() {
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim();
                if !key.is_empty() {
                    self.server_results
                        .push((key.to_string(), value.trim().to_string()));
                }
            }
        }
    }

    /// First value reported under `key`
    pub fn server_value(&self, key: &str) -> Option<&str> {
        self.server_results
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
