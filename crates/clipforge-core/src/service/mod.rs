//! Async trait contracts implemented by the store, fetch, origin, and net crates.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ClipforgeResult;
use crate::model::{
    CancellationToken, EgressIdentity, Job, JobCompletion, JobSpec, JobStatus, Progress,
    RecoveryState,
};

/// Whether an object is known to exist at the origin.
///
/// Modeled as a three-valued result rather than a boolean: a HEAD request can
/// fail for reasons unrelated to the object's existence (network error,
/// origin outage), and collapsing that into `false` would make `exists`
/// indistinguishable from "confirmed absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    /// The origin confirmed the object is present.
    Yes,
    /// The origin confirmed the object is absent.
    No,
    /// The check could not be completed.
    Error,
}

/// Outcome of a source fetch: local file metadata needed to proceed to upload.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// File name to use for the uploaded object.
    pub file_name: String,
    /// Size of the fetched file on disk, in bytes.
    pub size_bytes: u64,
}

/// Outcome of an origin upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    /// Object name the file was stored under.
    pub object_name: String,
    /// Public CDN url the object is now reachable at.
    pub cdn_url: String,
    /// Size of the uploaded object, in bytes.
    pub size_bytes: u64,
}

/// Receives progress updates emitted by a fetcher or uploader mid-operation.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Report an updated progress snapshot for the job being processed.
    async fn report(&self, progress: Progress);
}

/// Retrieves bytes for one of the four supported source kinds onto local disk.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch the job's source to `dest_path`, reporting progress as bytes arrive.
    ///
    /// Implementations must register `dest_path` with the recovery mirror's
    /// temp-file list before writing the first byte, and must clean it up on
    /// every exit path (success, failure, or cancellation).
    async fn fetch(
        &self,
        job: &Job,
        dest_path: &Path,
        cancellation: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> ClipforgeResult<FetchOutcome>;
}

/// Streams a local file to the object origin and manages its lifecycle there.
#[async_trait]
pub trait OriginUploader: Send + Sync {
    /// Stream `local_path` to the origin under `object_name`.
    async fn upload(
        &self,
        local_path: &Path,
        object_name: &str,
        cancellation: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> ClipforgeResult<UploadOutcome>;

    /// Delete a previously uploaded object.
    async fn delete(&self, object_name: &str) -> ClipforgeResult<()>;

    /// Check whether an object exists at the origin.
    async fn exists(&self, object_name: &str) -> Existence;

    /// Best-effort check that the object is reachable through the public CDN.
    ///
    /// Failures are logged but never fail the job; this is a health signal,
    /// not a correctness gate.
    async fn verify_cdn_access(&self, object_name: &str) -> bool;
}

/// Durable FIFO queue and state machine for import jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Admit a new job. Resubmitting an in-flight `request_id` returns the existing job.
    async fn submit(&self, spec: JobSpec) -> ClipforgeResult<Job>;

    /// Lease the next waiting job for `worker_id`, blocking up to `timeout`.
    async fn lease(&self, worker_id: &str, timeout: Duration) -> ClipforgeResult<Option<Job>>;

    /// Mark a leased job as terminally completed.
    async fn complete(&self, job_id: Uuid, result: JobCompletion) -> ClipforgeResult<()>;

    /// Mark a leased job as failed. `retryable` governs whether it is re-armed or terminated.
    async fn fail(&self, job_id: Uuid, reason: String, retryable: bool) -> ClipforgeResult<()>;

    /// Refresh a worker's lease on an active job.
    async fn extend_lease(&self, job_id: Uuid, worker_id: &str) -> ClipforgeResult<()>;

    /// Record an updated progress snapshot for an active job.
    async fn report_progress(&self, job_id: Uuid, progress: Progress) -> ClipforgeResult<()>;

    /// Re-arm a job for another attempt outside of the normal fail path
    /// (used by stall recovery on startup).
    async fn retry(&self, job_id: Uuid) -> ClipforgeResult<()>;

    /// Operator-initiated cancellation of an active job. Does not notify the catalog.
    async fn kill_active(&self, job_id: Uuid) -> ClipforgeResult<()>;

    /// Fetch a single job by id.
    async fn get(&self, job_id: Uuid) -> ClipforgeResult<Option<Job>>;

    /// List jobs, optionally filtered to a single status.
    async fn list(&self, status: Option<JobStatus>) -> ClipforgeResult<Vec<Job>>;

    /// Count jobs grouped by status.
    async fn counts_by_status(&self) -> ClipforgeResult<HashMap<JobStatus, u64>>;

    /// Fetch the recorded log lines for a job.
    async fn logs(&self, job_id: Uuid) -> ClipforgeResult<Vec<String>>;

    /// Stop leasing new jobs without disturbing jobs already in flight.
    async fn pause(&self) -> ClipforgeResult<()>;

    /// Resume leasing after a pause.
    async fn resume(&self) -> ClipforgeResult<()>;

    /// Remove every job still in `waiting`, leaving active/delayed jobs to finish.
    async fn drain(&self) -> ClipforgeResult<()>;

    /// Irrecoverably erase all job state. Requires `force` when jobs are still active.
    async fn obliterate(&self, force: bool) -> ClipforgeResult<()>;
}

/// Heartbeat-backed mirror used to detect and recover stalled jobs across restarts.
#[async_trait]
pub trait Recovery: Send + Sync {
    /// Write or refresh the heartbeat record for a job.
    async fn heartbeat(&self, state: RecoveryState) -> ClipforgeResult<()>;

    /// Remove a job's recovery record (and by extension, its tracked temp files).
    async fn purge(&self, job_id: Uuid) -> ClipforgeResult<()>;

    /// Scan for records whose heartbeat has gone stale.
    async fn scan_stalled(&self) -> ClipforgeResult<Vec<RecoveryState>>;

    /// Fetch a single job's recovery record.
    async fn get(&self, job_id: Uuid) -> ClipforgeResult<Option<RecoveryState>>;
}

/// Outbound webhook notifications to the external video catalog.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Register a brand new catalog entry for a job with no pre-existing `catalog_id`.
    async fn create_video(
        &self,
        name: &str,
        source_link: &str,
        import_job_id: Uuid,
    ) -> ClipforgeResult<()>;

    /// Attach a source link to an existing catalog entry on a first-attempt success.
    async fn update_source_link(
        &self,
        catalog_id: &str,
        source_link: &str,
        import_job_id: Uuid,
    ) -> ClipforgeResult<()>;

    /// Report a later-attempt (retried) success for an existing catalog entry.
    async fn report_import_success(
        &self,
        catalog_id: &str,
        source_link: &str,
        import_job_id: Uuid,
    ) -> ClipforgeResult<()>;

    /// Report a terminal import failure for an existing catalog entry.
    async fn report_import_failure(
        &self,
        catalog_id: &str,
        error: &str,
        source_url: &str,
        retry_count: u32,
    ) -> ClipforgeResult<()>;
}

/// Pool of egress identities used by the platform-id fetcher, sourced from an
/// external admin API with a hardcoded fallback list.
#[async_trait]
pub trait EgressPool: Send + Sync {
    /// Current identities, sorted by `(priority desc, success_rate desc)`.
    async fn list(&self) -> Vec<EgressIdentity>;

    /// Record the outcome of an attempt through an identity.
    ///
    /// Results for `hardcoded-*` fallback identities are dropped, since they
    /// are not backed by an account the admin API tracks health for.
    async fn report_result(&self, identity_url: &str, success: bool, response_ms: Option<u64>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<Progress>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn report(&self, progress: Progress) {
            self.seen.lock().expect("lock poisoned").push(progress);
        }
    }

    #[tokio::test]
    async fn progress_sink_records_reports() {
        let sink = RecordingSink::default();
        sink.report(Progress::default()).await;
        assert_eq!(sink.seen.lock().expect("lock poisoned").len(), 1);
    }

    #[test]
    fn existence_variants_are_distinguishable() {
        assert_ne!(Existence::Yes, Existence::No);
        assert_ne!(Existence::No, Existence::Error);
    }
}
