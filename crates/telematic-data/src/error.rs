//! Error types for the data access layer.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use telematic_core::LookupError;

/// Result alias for data layer operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors raised by the data access layer.
#[derive(Debug)]
pub enum DataError {
    /// Opening the connection pool failed.
    ConnectFailed {
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// A database operation failed.
    QueryFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying SQL error.
        source: sqlx::Error,
    },
}

impl DataError {
    /// Operation identifier used when surfacing this error through a service seam.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::ConnectFailed { .. } => "connect",
            Self::QueryFailed { operation, .. } => operation,
        }
    }
}

impl Display for DataError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed { .. } => formatter.write_str("database connection failed"),
            Self::QueryFailed { .. } => formatter.write_str("database operation failed"),
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ConnectFailed { source } | Self::QueryFailed { source, .. } => Some(source),
        }
    }
}

impl From<DataError> for LookupError {
    fn from(error: DataError) -> Self {
        Self::backend(error.operation(), error)
    }
}
