//! TOML configuration file
//!
//! ```toml
//! host = "ndt.example.net"
//! port = 3001
//! path = "/ndt_protocol"
//! secure = false
//! connect_timeout_secs = 10
//! tests = ["c2s", "s2c", "meta"]
//!
//! [meta]
//! "client.os" = "linux"
//! ```
//!
//! Command-line flags override file values.

use anyhow::{bail, Context, Result};
use ndt_client::{NdtClient, NdtClientBuilder};
use ndt_core::{TestKind, TestSet};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub secure: Option<bool>,
    pub connect_timeout_secs: Option<u64>,
    pub tests: Option<Vec<TestKind>>,
    pub meta: BTreeMap<String, String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Values given on the command line for `ndt run`
#[derive(Debug, Default)]
pub struct RunArgs {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub secure: bool,
    pub connect_timeout_secs: Option<u64>,
    pub tests: Vec<TestKind>,
    pub meta: Vec<String>,
}

/// Merge file and flags into a configured client
pub fn resolve(file: FileConfig, args: RunArgs) -> Result<NdtClient> {
    let Some(host) = args.host.or(file.host) else {
        bail!("No server given; pass a host or set `host` in the config file");
    };

    let mut builder = NdtClientBuilder::new(&host);
    if let Some(port) = args.port.or(file.port) {
        builder = builder.port(port);
    }
    if let Some(path) = args.path.or(file.path) {
        builder = builder.path(&path);
    }
    builder = builder.secure(args.secure || file.secure.unwrap_or(false));
    if let Some(secs) = args.connect_timeout_secs.or(file.connect_timeout_secs) {
        builder = builder.connect_timeout(Duration::from_secs(secs));
    }

    let tests = if args.tests.is_empty() {
        file.tests
    } else {
        Some(args.tests)
    };
    if let Some(tests) = tests {
        if tests.is_empty() {
            bail!("At least one test must be requested");
        }
        builder = builder.tests(tests.into_iter().collect::<TestSet>());
    }

    for (key, value) in &file.meta {
        builder = builder.meta(key, value);
    }
    for entry in &args.meta {
        let (key, value) = parse_meta(entry)?;
        builder = builder.meta(key, value);
    }

    Ok(builder.build())
}

fn parse_meta(entry: &str) -> Result<(&str, &str)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value.trim())),
        _ => bail!("Invalid meta entry {:?}, expected key=value", entry),
    }
}
