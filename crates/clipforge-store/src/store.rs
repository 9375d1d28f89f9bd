//! Postgres-backed implementation of the [`clipforge_core::JobStore`] trait.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clipforge_core::{
    ClipforgeError, ClipforgeResult, Job, JobCompletion, JobSpec, JobStatus, JobStore, Progress,
    RetryPolicy, SourceKind,
};
use serde_json::Value;
use sqlx::{PgPool, Row, types::Json};
use uuid::Uuid;

/// Database-backed repository for import jobs.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
    retry_policy: RetryPolicy,
    default_lease: Duration,
}

const SUBMIT_SQL: &str = r"
    INSERT INTO clipforge_store.jobs (
        id, request_id, source_kind, source_ref, file_name, catalog_id, api_key, max_attempts
    )
    VALUES ($1, $2, $3::clipforge_store.source_kind, $4, $5, $6, $7, $8)
    ON CONFLICT (request_id) WHERE status NOT IN ('completed', 'failed') DO UPDATE
    SET request_id = EXCLUDED.request_id
    RETURNING
        id, request_id, source_kind::text AS source_kind, source_ref, file_name, catalog_id,
        api_key, status::text AS status, attempts_made, max_attempts, progress, return_value,
        failure_reason, enqueued_at, started_at, finished_at
";

const LEASE_SQL: &str = r"
    UPDATE clipforge_store.jobs
    SET status = 'active', worker_id = $2,
        started_at = COALESCE(started_at, now()),
        lease_expires_at = now() + $3::interval
    WHERE id = (
        SELECT id FROM clipforge_store.jobs
        WHERE status IN ('waiting', 'delayed')
          AND (run_after IS NULL OR run_after <= now())
        ORDER BY enqueued_at ASC
        FOR UPDATE SKIP LOCKED
        LIMIT 1
    )
    RETURNING
        id, request_id, source_kind::text AS source_kind, source_ref, file_name, catalog_id,
        api_key, status::text AS status, attempts_made, max_attempts, progress, return_value,
        failure_reason, enqueued_at, started_at, finished_at
";

const IS_PAUSED_SQL: &str = "SELECT paused FROM clipforge_store.dispatcher_state WHERE id";

const COMPLETE_SQL: &str = r"
    UPDATE clipforge_store.jobs
    SET status = 'completed', return_value = $2, finished_at = now()
    WHERE id = $1 AND status = 'active'
";

const FAIL_RETRY_SQL: &str = r"
    UPDATE clipforge_store.jobs
    SET status = 'delayed',
        attempts_made = attempts_made + 1,
        failure_reason = $2,
        progress = '{}'::jsonb,
        worker_id = NULL,
        lease_expires_at = NULL,
        run_after = now() + $3::interval
    WHERE id = $1 AND status = 'active'
";

const FAIL_TERMINAL_SQL: &str = r"
    UPDATE clipforge_store.jobs
    SET status = 'failed',
        attempts_made = attempts_made + 1,
        failure_reason = $2,
        finished_at = now(),
        worker_id = NULL,
        lease_expires_at = NULL
    WHERE id = $1 AND status = 'active'
";

const EXTEND_LEASE_SQL: &str = r"
    UPDATE clipforge_store.jobs
    SET lease_expires_at = now() + $3::interval
    WHERE id = $1 AND worker_id = $2 AND status = 'active'
";

const REPORT_PROGRESS_SQL: &str = r"
    UPDATE clipforge_store.jobs
    SET progress = $2
    WHERE id = $1 AND status = 'active'
";

const RETRY_SQL: &str = r"
    UPDATE clipforge_store.jobs
    SET status = 'waiting', worker_id = NULL, lease_expires_at = NULL, run_after = NULL
    WHERE id = $1
";

const KILL_ACTIVE_SQL: &str = r"
    UPDATE clipforge_store.jobs
    SET status = 'failed', failure_reason = 'manual kill', finished_at = now(),
        worker_id = NULL, lease_expires_at = NULL
    WHERE id = $1 AND status = 'active'
";

const GET_SQL: &str = r"
    SELECT
        id, request_id, source_kind::text AS source_kind, source_ref, file_name, catalog_id,
        api_key, status::text AS status, attempts_made, max_attempts, progress, return_value,
        failure_reason, enqueued_at, started_at, finished_at
    FROM clipforge_store.jobs
    WHERE id = $1
";

const LIST_ALL_SQL: &str = r"
    SELECT
        id, request_id, source_kind::text AS source_kind, source_ref, file_name, catalog_id,
        api_key, status::text AS status, attempts_made, max_attempts, progress, return_value,
        failure_reason, enqueued_at, started_at, finished_at
    FROM clipforge_store.jobs
    ORDER BY enqueued_at ASC
";

const LIST_BY_STATUS_SQL: &str = r"
    SELECT
        id, request_id, source_kind::text AS source_kind, source_ref, file_name, catalog_id,
        api_key, status::text AS status, attempts_made, max_attempts, progress, return_value,
        failure_reason, enqueued_at, started_at, finished_at
    FROM clipforge_store.jobs
    WHERE status = $1::clipforge_store.job_status
    ORDER BY enqueued_at ASC
";

const COUNTS_SQL: &str = r"
    SELECT status::text AS status, count(*) AS total
    FROM clipforge_store.jobs
    GROUP BY status
";

const LOGS_SQL: &str = r"
    SELECT line FROM clipforge_store.job_logs WHERE job_id = $1 ORDER BY id ASC
";

const SET_PAUSED_SQL: &str = "UPDATE clipforge_store.dispatcher_state SET paused = $1";
const DRAIN_SQL: &str = "DELETE FROM clipforge_store.jobs WHERE status = 'waiting'";

const ACTIVE_COUNT_SQL: &str =
    "SELECT count(*) AS total FROM clipforge_store.jobs WHERE status = 'active'";
const OBLITERATE_SQL: &str =
    "TRUNCATE clipforge_store.jobs, clipforge_store.job_logs, clipforge_store.recovery_state";

impl PgJobStore {
    /// Initialise the job store, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail or the database is unreachable.
    pub async fn new(pool: PgPool) -> ClipforgeResult<Self> {
        Self::with_config(pool, RetryPolicy::default(), Duration::from_secs(30)).await
    }

    /// Initialise the job store with a custom retry policy and lease duration.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail or the database is unreachable.
    pub async fn with_config(
        pool: PgPool,
        retry_policy: RetryPolicy,
        default_lease: Duration,
    ) -> ClipforgeResult<Self> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&pool)
            .await
            .map_err(|err| ClipforgeError::internal(format!("migration failed: {err}")))?;
        Ok(Self {
            pool,
            retry_policy,
            default_lease,
        })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Append a log line for a job, independent of its current status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn append_log(&self, job_id: Uuid, line: &str) -> ClipforgeResult<()> {
        sqlx::query("INSERT INTO clipforge_store.job_logs (job_id, line) VALUES ($1, $2)")
            .bind(job_id)
            .bind(line)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn submit(&self, spec: JobSpec) -> ClipforgeResult<Job> {
        let id = Uuid::new_v4();
        let row = sqlx::query(SUBMIT_SQL)
            .bind(id)
            .bind(&spec.request_id)
            .bind(source_kind_to_str(spec.source_kind))
            .bind(&spec.source_ref)
            .bind(&spec.file_name)
            .bind(&spec.catalog_id)
            .bind(&spec.api_key)
            .bind(i32::try_from(spec.max_attempts).unwrap_or(i32::MAX))
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        row_to_job(&row)
    }

    async fn lease(&self, worker_id: &str, timeout: Duration) -> ClipforgeResult<Option<Job>> {
        let paused: bool = sqlx::query_scalar(IS_PAUSED_SQL)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        if paused {
            return Ok(None);
        }

        let lease_for = if timeout.is_zero() {
            self.default_lease
        } else {
            timeout
        };
        let row = sqlx::query(LEASE_SQL)
            .bind(worker_id)
            .bind(pg_interval(lease_for))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn complete(&self, job_id: Uuid, result: JobCompletion) -> ClipforgeResult<()> {
        let value = serde_json::to_value(&result)
            .map_err(|err| ClipforgeError::internal(format!("encode completion: {err}")))?;
        sqlx::query(COMPLETE_SQL)
            .bind(job_id)
            .bind(Json(value))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, reason: String, retryable: bool) -> ClipforgeResult<()> {
        if retryable {
            let job = self.get(job_id).await?;
            let exhausted = job.as_ref().is_none_or(clipforge_core::Job::attempts_exhausted);
            if exhausted {
                sqlx::query(FAIL_TERMINAL_SQL)
                    .bind(job_id)
                    .bind(&reason)
                    .execute(&self.pool)
                    .await
                    .map_err(db_err)?;
                return Ok(());
            }
            let attempts_made = job.map_or(0, |job| job.attempts_made);
            let delay = self.retry_policy.delay_for(attempts_made + 1);
            sqlx::query(FAIL_RETRY_SQL)
                .bind(job_id)
                .bind(&reason)
                .bind(pg_interval(delay))
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        } else {
            sqlx::query(FAIL_TERMINAL_SQL)
                .bind(job_id)
                .bind(&reason)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    async fn extend_lease(&self, job_id: Uuid, worker_id: &str) -> ClipforgeResult<()> {
        sqlx::query(EXTEND_LEASE_SQL)
            .bind(job_id)
            .bind(worker_id)
            .bind(pg_interval(self.default_lease))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn report_progress(&self, job_id: Uuid, progress: Progress) -> ClipforgeResult<()> {
        let value = serde_json::to_value(&progress)
            .map_err(|err| ClipforgeError::internal(format!("encode progress: {err}")))?;
        sqlx::query(REPORT_PROGRESS_SQL)
            .bind(job_id)
            .bind(Json(value))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn retry(&self, job_id: Uuid) -> ClipforgeResult<()> {
        sqlx::query(RETRY_SQL)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn kill_active(&self, job_id: Uuid) -> ClipforgeResult<()> {
        sqlx::query(KILL_ACTIVE_SQL)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> ClipforgeResult<Option<Job>> {
        let row = sqlx::query(GET_SQL)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn list(&self, status: Option<JobStatus>) -> ClipforgeResult<Vec<Job>> {
        let rows = if let Some(status) = status {
            sqlx::query(LIST_BY_STATUS_SQL)
                .bind(status_to_str(status))
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?
        } else {
            sqlx::query(LIST_ALL_SQL)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?
        };
        rows.iter().map(row_to_job).collect()
    }

    async fn counts_by_status(&self) -> ClipforgeResult<HashMap<JobStatus, u64>> {
        let rows = sqlx::query(COUNTS_SQL)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let mut counts = HashMap::new();
        for row in rows {
            let label: String = row.try_get("status").map_err(db_err)?;
            let total: i64 = row.try_get("total").map_err(db_err)?;
            counts.insert(str_to_status(&label)?, u64::try_from(total).unwrap_or(0));
        }
        Ok(counts)
    }

    async fn logs(&self, job_id: Uuid) -> ClipforgeResult<Vec<String>> {
        let rows = sqlx::query(LOGS_SQL)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("line").map_err(db_err))
            .collect()
    }

    async fn pause(&self) -> ClipforgeResult<()> {
        sqlx::query(SET_PAUSED_SQL)
            .bind(true)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn resume(&self) -> ClipforgeResult<()> {
        sqlx::query(SET_PAUSED_SQL)
            .bind(false)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn drain(&self) -> ClipforgeResult<()> {
        sqlx::query(DRAIN_SQL).execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }

    async fn obliterate(&self, force: bool) -> ClipforgeResult<()> {
        if !force {
            let active: i64 = sqlx::query_scalar(ACTIVE_COUNT_SQL)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
            if active > 0 {
                return Err(ClipforgeError::internal(
                    "refusing to obliterate with active jobs in flight; pass force=true",
                ));
            }
        }
        sqlx::query(OBLITERATE_SQL)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

fn db_err(err: sqlx::Error) -> ClipforgeError {
    ClipforgeError::internal(err.to_string())
}

fn pg_interval(duration: Duration) -> String {
    format!("{} milliseconds", duration.as_millis())
}

const fn source_kind_to_str(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Url => "url",
        SourceKind::Drive => "drive",
        SourceKind::Platform => "platform",
        SourceKind::Local => "local",
    }
}

fn str_to_source_kind(label: &str) -> ClipforgeResult<SourceKind> {
    match label {
        "url" => Ok(SourceKind::Url),
        "drive" => Ok(SourceKind::Drive),
        "platform" => Ok(SourceKind::Platform),
        "local" => Ok(SourceKind::Local),
        other => Err(ClipforgeError::internal(format!(
            "unknown source_kind in database: {other}"
        ))),
    }
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
            "unknown job status in database: {other}"
        ))),
    }
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> ClipforgeResult<Job> {
    let source_kind: String = row.try_get("source_kind").map_err(db_err)?;
    let status: String = row.try_get("status").map_err(db_err)?;
    let progress: Json<Value> = row.try_get("progress").map_err(db_err)?;
    let return_value: Option<Json<Value>> = row.try_get("return_value").map_err(db_err)?;
    let attempts_made: i32 = row.try_get("attempts_made").map_err(db_err)?;
    let max_attempts: i32 = row.try_get("max_attempts").map_err(db_err)?;

    Ok(Job {
        id: row.try_get("id").map_err(db_err)?,
        request_id: row.try_get("request_id").map_err(db_err)?,
        source_kind: str_to_source_kind(&source_kind)?,
        source_ref: row.try_get("source_ref").map_err(db_err)?,
        file_name: row.try_get("file_name").map_err(db_err)?,
        catalog_id: row.try_get("catalog_id").map_err(db_err)?,
        api_key: row.try_get("api_key").map_err(db_err)?,
        status: str_to_status(&status)?,
        attempts_made: u32::try_from(attempts_made).unwrap_or(0),
        max_attempts: u32::try_from(max_attempts).unwrap_or(0),
        progress: serde_json::from_value(progress.0)
            .map_err(|err| ClipforgeError::internal(format!("decode progress: {err}")))?,
        return_value: return_value
            .map(|value| serde_json::from_value(value.0))
            .transpose()
            .map_err(|err| ClipforgeError::internal(format!("decode completion: {err}")))?,
        failure_reason: row.try_get("failure_reason").map_err(db_err)?,
        enqueued_at: row.try_get::<DateTime<Utc>, _>("enqueued_at").map_err(db_err)?,
        started_at: row.try_get("started_at").map_err(db_err)?,
        finished_at: row.try_get("finished_at").map_err(db_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_round_trips() {
        for kind in [
            SourceKind::Url,
            SourceKind::Drive,
            SourceKind::Platform,
            SourceKind::Local,
        ] {
            assert_eq!(str_to_source_kind(source_kind_to_str(kind)).unwrap(), kind);
        }
    }

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

    #[test]
    fn unknown_status_is_rejected() {
        assert!(str_to_status("bogus").is_err());
    }

    #[test]
    fn pg_interval_formats_milliseconds() {
        assert_eq!(pg_interval(Duration::from_secs(5)), "5000 milliseconds");
    }
}
