#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]

//! Transport-agnostic domain types and collaborator interfaces for the
//! telematic bridge.
//!
//! Layout: `model.rs` (channels, units, events), `bus.rs` (message bus seam),
//! `services.rs` (lookup, status, and sink seams), `point.rs` (sink data
//! points), `error.rs` (typed errors per seam).

pub mod bus;
pub mod error;
pub mod model;
pub mod point;
pub mod services;

pub use bus::{BusConnector, InboundMessage, MessageBus, MessageStream};
pub use error::{
    BusError, BusResult, LookupError, LookupResult, ParseChannelError, RegistrationError,
    SinkError, SinkResult,
};
pub use model::{
    ActiveEvent, Channel, ChannelSelector, EventStatus, RegisteredUnit, RegistrationRequest,
};
pub use point::{DataPoint, FieldValue};
pub use services::{EventLookup, EventStatusService, SinkWriter};
