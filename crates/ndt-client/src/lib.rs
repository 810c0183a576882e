//! NDT Client Library
//!
//! Session engine and async client for the NDT control channel.
//!
//! # Example
//!
//! ```ignore
//! use ndt_client::NdtClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = NdtClient::builder("ndt.example.net")
//!         .port(3001)
//!         .meta("client.os", "linux")
//!         .build();
//!
//!     let result = client.run().await?;
//!     println!("download {:?} kbps", result.download_rate);
//!
//!     Ok(())
//! }
//! ```
//!
//! The [`Session`] state machine has no I/O of its own and can be driven by
//! hand, which is how its tests exercise it.

pub mod builder;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod result;
pub mod runner;
pub mod session;

pub use builder::NdtClientBuilder;
pub use channel::{ControlChannel, Outbound, Outbox};
pub use client::NdtClient;
pub use config::{ClientConfig, SessionConfig};
pub use error::{ClientError, ProtocolError, Result};
pub use result::SessionResult;
pub use runner::{
    DataPlane, MetaRunner, NoDataPlane, PhaseContext, PhaseOutcome, PhaseStatus, RunnerFactory,
    StandardRunners, TestPhaseRunner, ThroughputRunner,
};
pub use session::{Session, SessionState};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::NdtClientBuilder;
    pub use crate::client::NdtClient;
    pub use crate::error::{ClientError, Result};
    pub use crate::result::SessionResult;
    pub use ndt_core::{TestKind, TestSet};
}
