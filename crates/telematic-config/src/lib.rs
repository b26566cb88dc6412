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

//! Environment-backed configuration for the telematic bridge.
//!
//! Layout: `model.rs` (typed settings and the channel table), `loader.rs`
//! (environment lookup), `validate.rs` (parsing helpers), `defaults.rs`
//! (default values), `error.rs` (typed errors).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use model::{
    BridgeConfig, ChannelProfile, ChannelTable, HttpSettings, InfluxSettings, NatsSettings,
    ProbeSettings, RetrySettings,
};
