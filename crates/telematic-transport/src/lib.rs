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

//! Adapters implementing the telematic bus and sink seams.
//!
//! Layout: `nats.rs` (async-nats bus), `influx.rs` (InfluxDB v2 HTTP sink),
//! `memory.rs` (in-process bus with subject wildcards), `subject.rs` (subject
//! matching shared by the in-process bus).

pub mod influx;
pub mod memory;
pub mod nats;
pub mod subject;

pub use influx::InfluxSink;
pub use memory::{MemoryBroker, MemoryBus, MemoryConnector};
pub use nats::{NatsBus, NatsConnector};
