//! Error types for configuration loading.

use thiserror::Error;

/// Primary error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was not set.
    #[error("missing required environment variable {name}")]
    MissingVar {
        /// Name of the missing variable.
        name: &'static str,
    },
    /// An environment variable was set but could not be parsed.
    #[error("environment variable {name} has an invalid value: {detail}")]
    InvalidVar {
        /// Name of the offending variable.
        name: &'static str,
        /// Human-readable parse failure detail.
        detail: String,
    },
    /// A field failed cross-field or range validation after parsing.
    #[error("invalid configuration: {detail}")]
    Invalid {
        /// Human-readable validation failure detail.
        detail: String,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
