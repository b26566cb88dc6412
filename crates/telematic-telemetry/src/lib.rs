#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Telemetry primitives shared across the telematic bridge.
//!
//! This crate centralises logging and metrics so the channel workers, the
//! control plane, and the listing endpoint report through one pipeline.
//!
//! Layout: `init.rs` (subscriber install), `metrics.rs` (Prometheus registry),
//! `error.rs` (typed errors).

pub mod error;
pub mod init;
pub mod metrics;

pub use error::{Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::{Metrics, MetricsSnapshot, ProbeOutcomeLabel, RegistrationOutcome};
