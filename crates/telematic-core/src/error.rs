//! Error types for the collaborator seams.
//!
//! # Design
//! - Keep error messages constant while carrying context fields for debugging.
//! - Adapter errors are flattened into `detail` strings so the seams stay
//!   independent of any client library.
//! - Distinguish "no reply" request failures from other transport failures,
//!   since the liveness prober treats them differently.

use thiserror::Error;

/// Result alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Result alias for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Result alias for lookup and status operations.
pub type LookupResult<T> = Result<T, LookupError>;

/// Errors raised by message bus adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Establishing the bus connection failed.
    #[error("bus connection failed")]
    Connect {
        /// Address that was dialled.
        address: String,
        /// Adapter-specific failure detail.
        detail: String,
    },
    /// Creating a subscription failed.
    #[error("bus subscription failed")]
    Subscribe {
        /// Subject that could not be subscribed.
        subject: String,
        /// Adapter-specific failure detail.
        detail: String,
    },
    /// Publishing a message failed.
    #[error("bus publish failed")]
    Publish {
        /// Subject the publish targeted.
        subject: String,
        /// Adapter-specific failure detail.
        detail: String,
    },
    /// A request received no reply before its deadline.
    #[error("bus request timed out")]
    TimedOut {
        /// Subject the request targeted.
        subject: String,
    },
    /// A request was cancelled because nothing listens on the subject.
    #[error("bus request had no responders")]
    NoResponders {
        /// Subject the request targeted.
        subject: String,
    },
    /// A request failed for any other reason.
    #[error("bus request failed")]
    Request {
        /// Subject the request targeted.
        subject: String,
        /// Adapter-specific failure detail.
        detail: String,
    },
}

impl BusError {
    /// Returns `true` when the request ended without any reply from the peer.
    #[must_use]
    pub const fn is_no_reply(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::NoResponders { .. })
    }
}

/// Errors raised by sink adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The sink could not be reached.
    #[error("sink connection failed")]
    Connect {
        /// Address that was dialled.
        address: String,
        /// Adapter-specific failure detail.
        detail: String,
    },
    /// The sink answered with a non-success status.
    #[error("sink returned an error status")]
    Status {
        /// Operation identifier.
        operation: &'static str,
        /// Status code returned by the sink.
        status: u16,
    },
    /// A write was rejected or could not be delivered.
    #[error("sink write failed")]
    Write {
        /// Bucket targeted by the write.
        bucket: String,
        /// Adapter-specific failure detail.
        detail: String,
    },
    /// A write was attempted before `connect` succeeded.
    #[error("sink not connected")]
    NotConnected,
}

/// Errors raised by the event lookup and status services.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The backing store failed.
    #[error("event store operation failed")]
    Backend {
        /// Operation identifier.
        operation: &'static str,
        /// Source backend error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl LookupError {
    /// Wrap a backend error with the operation that produced it.
    pub fn backend(
        operation: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Backend {
            operation,
            source: source.into(),
        }
    }
}

/// A channel selector string did not name a known channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid channel selector")]
pub struct ParseChannelError {
    /// Offending selector value.
    pub value: String,
}

/// Registration payloads that cannot be turned into a registration request.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The payload was not valid JSON.
    #[error("registration payload is not valid json")]
    InvalidJson {
        /// Source parse error.
        source: serde_json::Error,
    },
    /// The payload was JSON but not an object.
    #[error("registration payload is not a json object")]
    NotAnObject,
    /// The payload lacked a string `unit_id`.
    #[error("registration payload is missing unit_id")]
    MissingUnitId,
}
