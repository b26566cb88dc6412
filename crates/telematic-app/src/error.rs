//! # Design
//!
//! - Centralize application-level errors for bootstrap and supervision.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded or validated.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: telematic_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: telematic_telemetry::TelemetryError,
    },
    /// The event store could not be opened.
    #[error("event store operation failed")]
    Data {
        /// Operation identifier.
        operation: &'static str,
        /// Source data error.
        source: telematic_data::DataError,
    },
    /// A sink adapter could not be constructed.
    #[error("sink operation failed")]
    Sink {
        /// Operation identifier.
        operation: &'static str,
        /// Source sink error.
        source: telematic_core::SinkError,
    },
    /// The listing endpoint failed to bind or serve.
    #[error("http listener failed")]
    Http {
        /// Operation identifier.
        operation: &'static str,
        /// Address the listener was bound to.
        addr: SocketAddr,
        /// Source IO error.
        source: io::Error,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: telematic_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: telematic_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn data(operation: &'static str, source: telematic_data::DataError) -> Self {
        Self::Data { operation, source }
    }

    pub(crate) const fn sink(operation: &'static str, source: telematic_core::SinkError) -> Self {
        Self::Sink { operation, source }
    }

    pub(crate) const fn http(operation: &'static str, addr: SocketAddr, source: io::Error) -> Self {
        Self::Http {
            operation,
            addr,
            source,
        }
    }
}
