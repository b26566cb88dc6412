//! Error types for configuration loading.

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable was not set.
    #[error("missing configuration value")]
    MissingField {
        /// Environment variable name.
        field: &'static str,
    },
    /// The channel selector did not name a known channel.
    #[error("invalid channel selector")]
    InvalidChannelSelector {
        /// Selector value provided by the operator.
        value: String,
    },
    /// A variable contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Environment variable name.
        field: String,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_stay_constant() {
        assert_eq!(
            ConfigError::MissingField {
                field: "TELEMATIC_CHANNEL"
            }
            .to_string(),
            "missing configuration value"
        );
        assert_eq!(
            ConfigError::InvalidChannelSelector {
                value: "INVALID".into()
            }
            .to_string(),
            "invalid channel selector"
        );
        assert_eq!(
            ConfigError::InvalidField {
                field: "TELEMATIC_PROBE_PERIOD_MS".into(),
                value: Some("0".into()),
                reason: "must_be_positive",
            }
            .to_string(),
            "invalid configuration field"
        );
    }
}
