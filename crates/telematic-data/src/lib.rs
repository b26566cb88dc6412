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

//! Event persistence for the telematic bridge: active-event lookup and
//! event status updates backed by PostgreSQL.

pub mod error;
pub mod store;

pub use error::{DataError, Result as DataResult};
pub use store::EventStore;
