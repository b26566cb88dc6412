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

//! Telematic bridge service wiring.
//!
//! Layout: `bootstrap.rs` (service wiring), `supervisor.rs` (worker lifecycle),
//! `connect.rs` (bus and sink bootstrap), `refresher.rs` (telemetry topics),
//! `registration.rs` (unit registration), `prober.rs` (liveness probing),
//! `registry.rs` (registered units), `api.rs` (listing endpoint).

/// Read-only HTTP surface.
pub mod api;
/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Bus and sink connection bootstrap with retry.
pub mod connect;
/// Application error types.
pub mod error;
/// Periodic liveness probing of registered units.
pub mod prober;
/// Telemetry subscription refresh and dispatch.
pub mod refresher;
/// Unit registration handling.
pub mod registration;
/// In-memory registry of registered units.
pub mod registry;
/// Reconnect backoff policies.
pub mod retry;
/// Channel worker and control plane supervision.
pub mod supervisor;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
