//! Repeated MQTT CONNECT probe.
//!
//! Some brokers refuse a connection (for example on bad credentials) without
//! ever sending the CONNACK, which leaves the client waiting until its own
//! timeout. This crate connects to a broker over and over, classifies every
//! attempt as connected, refused with a CONNACK, or failed without one, and
//! reports whether any CONNACK went missing.
//!
//! # Example
//!
//! ```no_run
//! use giztoy_connack::{ProbeConfig, ProbeRunner};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ProbeConfig::new("127.0.0.1", 1883)
//!         .with_credentials("wronguser", "wrongpassword")
//!         .with_attempts(10);
//!
//!     let report = ProbeRunner::new(config)
//!         .run(&CancellationToken::new())
//!         .await;
//!
//!     giztoy_connack::print_summary(&report);
//!     report.verify()?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod outcome;
mod reason;
mod report;
mod runner;

pub use client::{ClientHandle, ConnectFailure, Connector, MqttConnector, MqttHandle, Released};
pub use config::{ProbeConfig, generate_client_id};
pub use error::{Error, Result};
pub use outcome::{AttemptOutcome, AttemptRecord, Bucket, Tally};
pub use reason::{ReasonCode, ReasonKind, is_transport_refusal};
pub use report::{ProbeReport, format_attempt, print_attempt, print_summary};
pub use runner::ProbeRunner;
