//! Postgres-backed implementation of the [`clipforge_core::Recovery`] trait.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clipforge_core::{ClipforgeError, ClipforgeResult, JobStatus, Progress, Recovery, RecoveryState};
use serde_json::Value;
use sqlx::{PgPool, Row, types::Json};
use uuid::Uuid;

/// Heartbeat-backed mirror of job state used to detect and recover stalled jobs across restarts.
///
/// Records live for up to `ttl` past their last heartbeat; a record older
/// than `stale_threshold` with no corresponding refresh is considered
/// stalled by [`Recovery::scan_stalled`].
#[derive(Clone)]
pub struct PgRecoveryMirror {
    pool: PgPool,
    stale_threshold: Duration,
    ttl: Duration,
}

const HEARTBEAT_SQL: &str = r"
    INSERT INTO clipforge_store.recovery_state (job_id, status, progress, temp_files, updated_at)
    VALUES ($1, $2::clipforge_store.job_status, $3, $4, now())
    ON CONFLICT (job_id) DO UPDATE
    SET status = EXCLUDED.status,
        progress = EXCLUDED.progress,
        temp_files = EXCLUDED.temp_files,
        updated_at = now()
";

const PURGE_SQL: &str = "DELETE FROM clipforge_store.recovery_state WHERE job_id = $1";

const GET_SQL: &str = r"
    SELECT job_id, status::text AS status, progress, temp_files, updated_at
    FROM clipforge_store.recovery_state
    WHERE job_id = $1
";

const SCAN_STALE_SQL: &str = r"
    SELECT job_id, status::text AS status, progress, temp_files, updated_at
    FROM clipforge_store.recovery_state
    WHERE updated_at < $1
    ORDER BY updated_at ASC
";

const GC_EXPIRED_SQL: &str = "DELETE FROM clipforge_store.recovery_state WHERE updated_at < $1";

impl PgRecoveryMirror {
    /// Construct a recovery mirror with the default 5-minute stale threshold and 1-hour TTL.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, Duration::from_secs(5 * 60), Duration::from_secs(60 * 60))
    }

    /// Construct a recovery mirror with custom staleness and TTL windows.
    #[must_use]
    pub const fn with_config(pool: PgPool, stale_threshold: Duration, ttl: Duration) -> Self {
        Self {
            pool,
            stale_threshold,
            ttl,
        }
    }

    /// Remove records whose heartbeat is older than the configured TTL.
    ///
    /// Run periodically by the supervisor; unlike [`Recovery::scan_stalled`]
    /// this does not attempt recovery, it only reclaims rows that even a
    /// crash-recovery sweep would no longer consider meaningful.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn garbage_collect_expired(&self) -> ClipforgeResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.ttl).unwrap_or_default();
        let result = sqlx::query(GC_EXPIRED_SQL)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Recovery for PgRecoveryMirror {
    async fn heartbeat(&self, state: RecoveryState) -> ClipforgeResult<()> {
        let progress = serde_json::to_value(&state.progress)
            .map_err(|err| ClipforgeError::internal(format!("encode progress: {err}")))?;
        let temp_files = serde_json::to_value(&state.temp_files)
            .map_err(|err| ClipforgeError::internal(format!("encode temp files: {err}")))?;
        sqlx::query(HEARTBEAT_SQL)
            .bind(state.job_id)
            .bind(status_to_str(state.status))
            .bind(Json(progress))
            .bind(Json(temp_files))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn purge(&self, job_id: Uuid) -> ClipforgeResult<()> {
        sqlx::query(PURGE_SQL)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn scan_stalled(&self) -> ClipforgeResult<Vec<RecoveryState>> {
        let cutoff =
            Utc::now() - chrono::Duration::from_std(self.stale_threshold).unwrap_or_default();
        let rows = sqlx::query(SCAN_STALE_SQL)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_state).collect()
    }

    async fn get(&self, job_id: Uuid) -> ClipforgeResult<Option<RecoveryState>> {
        let row = sqlx::query(GET_SQL)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_state).transpose()
    }
}

fn db_err(err: sqlx::Error) -> ClipforgeError {
    ClipforgeError::internal(err.to_string())
}

const fn status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Waiting => "waiting",
        JobStatus::Active => "active",
        JobStatus::Delayed => "delayed",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    }
}

fn str_to_status(label: &str) -> ClipforgeResult<JobStatus> {
    match label {
        "waiting" => Ok(JobStatus::Waiting),
        "active" => Ok(JobStatus::Active),
        "delayed" => Ok(JobStatus::Delayed),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        other => Err(ClipforgeError::internal(format!(
            "unknown job status in recovery_state: {other}"
        ))),
    }
}

fn row_to_state(row: &sqlx::postgres::PgRow) -> ClipforgeResult<RecoveryState> {
    let status: String = row.try_get("status").map_err(db_err)?;
    let progress: Json<Value> = row.try_get("progress").map_err(db_err)?;
    let temp_files: Json<Value> = row.try_get("temp_files").map_err(db_err)?;

    Ok(RecoveryState {
        job_id: row.try_get("job_id").map_err(db_err)?,
        status: str_to_status(&status)?,
        progress: serde_json::from_value::<Progress>(progress.0)
            .map_err(|err| ClipforgeError::internal(format!("decode progress: {err}")))?,
        temp_files: serde_json::from_value(temp_files.0)
            .map_err(|err| ClipforgeError::internal(format!("decode temp files: {err}")))?,
        timestamp: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(db_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            JobStatus::Waiting,
            JobStatus::Active,
            JobStatus::Delayed,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(str_to_status(status_to_str(status)).unwrap(), status);
        }
    }
}
