//! # Design
//!
//! - Centralize application-level errors for bootstrap and the worker loop.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Environment configuration was missing.
    #[error("missing environment configuration")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: &'static str,
    },
    /// Configuration loading failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: clipforge_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: clipforge_telemetry::TelemetryError,
    },
    /// Job-store or domain operations failed.
    #[error("job pipeline operation failed")]
    Pipeline {
        /// Operation identifier.
        operation: &'static str,
        /// Source pipeline error.
        source: clipforge_core::ClipforgeError,
    },
    /// Database pool construction or migration failed.
    #[error("database operation failed")]
    Database {
        /// Operation identifier.
        operation: &'static str,
        /// Source database error.
        source: sqlx::Error,
    },
    /// Required runtime state was missing.
    #[error("missing state")]
    MissingState {
        /// State field that was missing.
        field: &'static str,
        /// Optional value associated with the missing state.
        value: Option<String>,
    },
    /// Required dependency was missing.
    #[error("missing dependency")]
    MissingDependency {
        /// Name of the missing dependency.
        name: &'static str,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: clipforge_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: clipforge_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn pipeline(operation: &'static str, source: clipforge_core::ClipforgeError) -> Self {
        Self::Pipeline { operation, source }
    }

    pub(crate) const fn database(operation: &'static str, source: sqlx::Error) -> Self {
        Self::Database { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_error_helpers_build_variants() {
        let config = AppError::config(
            "load",
            clipforge_config::ConfigError::Invalid {
                detail: "bad".to_string(),
            },
        );
        assert!(matches!(config, AppError::Config { .. }));

        let pipeline = AppError::pipeline("lease", clipforge_core::ClipforgeError::SourceNotFound);
        assert!(matches!(pipeline, AppError::Pipeline { .. }));
    }
}
