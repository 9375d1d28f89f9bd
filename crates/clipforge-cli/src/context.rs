//! Job store connection setup and the CLI-level error type.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use clipforge_core::JobStore;
use clipforge_store::PgJobStore;
use sqlx::postgres::PgPoolOptions;

const POOL_MAX_CONNECTIONS: u32 = 2;

/// CLI-level error type to distinguish validation from operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

/// Dependencies constructed from CLI flags and the environment.
pub(crate) struct CliDependencies {
    pub(crate) store: Arc<dyn JobStore>,
}

impl CliDependencies {
    /// Open a pool against the job store's backing database and apply migrations.
    pub(crate) async fn connect(queue_url: &str) -> CliResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .connect(queue_url)
            .await
            .map_err(|err| {
                CliError::failure(anyhow::anyhow!("failed to connect to job store: {err}"))
            })?;

        let store = PgJobStore::new(pool)
            .await
            .map_err(|err| CliError::failure(anyhow::anyhow!("failed to open job store: {err}")))?;

        Ok(Self {
            store: Arc::new(store),
        })
    }
}
