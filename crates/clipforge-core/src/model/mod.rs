//! Core job, progress, and recovery domain types shared across the workspace.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a job's source was supplied by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A publicly reachable download URL.
    Url,
    /// A cloud-drive share link.
    Drive,
    /// A video-platform identifier resolved by the external downloader binary.
    Platform,
    /// A file already staged on local disk by the resumable-upload server.
    Local,
}

/// Lifecycle state of a job as tracked by the job store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, not yet leased by a worker.
    Waiting,
    /// Leased and currently being processed by a worker.
    Active,
    /// Re-armed after a retryable failure, waiting out its backoff delay.
    Delayed,
    /// Terminal success.
    Completed,
    /// Terminal failure (permanent, or retries exhausted).
    Failed,
}

impl JobStatus {
    /// Whether this status is terminal (no further transitions expected).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Pipeline stage a job is currently executing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportStage {
    /// Source fetcher is pulling bytes onto local disk.
    Downloading,
    /// Origin uploader is streaming the local file to the CDN origin.
    Uploading,
    /// Temp files are being reclaimed after a terminal transition.
    Cleanup,
}

/// Caller-supplied request used to admit a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Idempotency key. Resubmitting the same `request_id` while a
    /// non-expired job with that id exists returns the existing job.
    pub request_id: String,
    /// How the source should be fetched.
    pub source_kind: SourceKind,
    /// Source-kind-specific reference (URL, share link, platform id, or local path).
    pub source_ref: String,
    /// Optional caller-supplied file name override.
    pub file_name: Option<String>,
    /// Optional pre-existing catalog entry this import should attach to.
    pub catalog_id: Option<String>,
    /// Optional API key used by the cloud-drive fetcher's signed-fetch auth mode.
    pub api_key: Option<String>,
    /// Maximum number of attempts before the job is failed permanently.
    pub max_attempts: u32,
}

/// Quality fields harvested from the downloader's pre-probe line or stdout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectedQuality {
    /// Format identifier reported by the downloader.
    pub format_id: String,
    /// Resolution, e.g. `"1920x1080"`.
    pub resolution: Option<String>,
    /// Frames per second, when reported.
    pub fps: Option<u32>,
    /// Video codec token (`vp09`, `avc1`, `av01`, ...).
    pub vcodec: Option<String>,
    /// Audio codec token (`opus`, `mp4a`, `aac`, ...).
    pub acodec: Option<String>,
    /// Freeform note accompanying the pre-probe line.
    pub note: Option<String>,
}

/// A single egress identity attempt made while downloading a platform-id source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EgressAttempt {
    /// Egress identity url used for the attempt.
    pub identity_url: String,
    /// 1-based attempt number within the job's current execution.
    pub attempt_number: u32,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt ended, if it has.
    pub ended_at: Option<DateTime<Utc>>,
    /// Whether the attempt succeeded.
    pub succeeded: bool,
    /// Observed response latency, in milliseconds.
    pub response_ms: Option<u64>,
    /// Error message, when the attempt failed.
    pub error: Option<String>,
}

/// Progress snapshot for a job, overwritten on every report and reset on retry.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Progress {
    /// Pipeline stage this snapshot applies to.
    pub stage: Option<ImportStage>,
    /// Completion percentage in `[0, 100]`, monotonic non-decreasing within an attempt.
    pub percentage: f64,
    /// Human-readable status message.
    pub message: String,
    /// Egress identities tried so far, for platform-id sources.
    pub egress_attempts: Option<Vec<EgressAttempt>>,
    /// Quality selected by the downloader's pre-probe, for platform-id sources.
    pub selected_quality: Option<SelectedQuality>,
}

/// Result payload recorded on a successfully completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobCompletion {
    /// Public CDN url the object is now reachable at.
    pub cdn_url: String,
    /// Final file name deposited at the origin.
    pub file_name: String,
    /// Size of the deposited object, in bytes.
    pub size_bytes: u64,
    /// Attempts consumed before this job completed.
    pub attempts_made: u32,
    /// Egress identities tried, for platform-id sources.
    pub egress_attempts: Option<Vec<EgressAttempt>>,
}

/// A durable unit of work tracked by the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Internal job identifier.
    pub id: Uuid,
    /// Caller-supplied idempotency key.
    pub request_id: String,
    /// How the source should be fetched.
    pub source_kind: SourceKind,
    /// Source-kind-specific reference.
    pub source_ref: String,
    /// Optional caller-supplied file name override.
    pub file_name: Option<String>,
    /// Optional pre-existing catalog entry this import attaches to.
    pub catalog_id: Option<String>,
    /// Optional API key for the cloud-drive fetcher's signed-fetch auth mode.
    pub api_key: Option<String>,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Attempts consumed so far.
    pub attempts_made: u32,
    /// Maximum attempts permitted before a permanent failure.
    pub max_attempts: u32,
    /// Current progress snapshot.
    pub progress: Progress,
    /// Result payload, set only on terminal success.
    pub return_value: Option<JobCompletion>,
    /// Failure reason, set only on terminal failure.
    pub failure_reason: Option<String>,
    /// When the job was admitted.
    pub enqueued_at: DateTime<Utc>,
    /// When the job's current attempt started, if leased.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state, if it has.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether the current attempt is the job's last available attempt.
    ///
    /// Adopted for terminal-transition clarity: a job is considered exhausted
    /// once its next attempt would meet or exceed `max_attempts`, rather than
    /// waiting for `attempts_made` to equal `max_attempts` after the fact.
    #[must_use]
    pub const fn attempts_exhausted(&self) -> bool {
        self.attempts_made + 1 >= self.max_attempts
    }

    /// Whether this is a retry of a previously attempted job (not the first attempt).
    #[must_use]
    pub const fn is_retry(&self) -> bool {
        self.attempts_made > 0
    }
}

/// Heartbeat-backed mirror of a job's state, used to detect and recover stalled work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryState {
    /// Job this record mirrors.
    pub job_id: Uuid,
    /// Lifecycle state at the time of the last heartbeat.
    pub status: JobStatus,
    /// Progress snapshot at the time of the last heartbeat.
    pub progress: Progress,
    /// Temp files registered for this job, for cleanup on crash recovery.
    pub temp_files: Vec<String>,
    /// Time of the last heartbeat refresh.
    pub timestamp: DateTime<Utc>,
}

/// A candidate egress identity used by the platform-id fetcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EgressIdentity {
    /// Stable identifier for the identity.
    pub id: String,
    /// Proxy/egress url passed to the downloader child process.
    pub url: String,
    /// Selection priority; higher is preferred.
    pub priority: i32,
    /// Rolling success rate in `[0, 1]`.
    pub success_rate: f64,
}

impl EgressIdentity {
    /// Fallback identities (`hardcoded-*`) are never reported on, since they
    /// are not backed by a real account the admin API tracks health for.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.id.starts_with("hardcoded-")
    }
}

/// Order identities by `(priority desc, success_rate desc)`, the order the
/// platform-id fetcher iterates them in.
pub fn sort_identities(identities: &mut [EgressIdentity]) {
    identities.sort_by(|left, right| {
        right
            .priority
            .cmp(&left.priority)
            .then(right.success_rate.total_cmp(&left.success_rate))
    });
}

/// Cooperative cancellation signal threaded through a job's suspension points.
///
/// Checked at queue lease, HTTP body reads, disk reads/writes, child-process
/// output reads, and timed waits. Setting it does not interrupt in-flight
/// work directly; the running task observes it the next time it yields.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Construct a fresh, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Raise the cancellation signal.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_exhausted_uses_next_attempt_lookahead() {
        let mut job = sample_job();
        job.max_attempts = 3;
        job.attempts_made = 1;
        assert!(!job.attempts_exhausted());
        job.attempts_made = 2;
        assert!(job.attempts_exhausted());
    }

    #[test]
    fn sort_identities_orders_by_priority_then_success_rate() {
        let mut identities = vec![
            EgressIdentity {
                id: "a".into(),
                url: "http://a".into(),
                priority: 1,
                success_rate: 0.9,
            },
            EgressIdentity {
                id: "b".into(),
                url: "http://b".into(),
                priority: 2,
                success_rate: 0.1,
            },
            EgressIdentity {
                id: "c".into(),
                url: "http://c".into(),
                priority: 1,
                success_rate: 0.95,
            },
        ];
        sort_identities(&mut identities);
        assert_eq!(
            identities.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["b", "c", "a"]
        );
    }

    #[test]
    fn hardcoded_identities_are_fallback() {
        let identity = EgressIdentity {
            id: "hardcoded-1".into(),
            url: "http://fallback".into(),
            priority: 0,
            success_rate: 0.0,
        };
        assert!(identity.is_fallback());
    }

    #[test]
    fn cancellation_token_observes_cancel() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    fn sample_job() -> Job {
        Job {
            id: Uuid::nil(),
            request_id: "req-1".into(),
            source_kind: SourceKind::Url,
            source_ref: "https://example.com/video.mp4".into(),
            file_name: None,
            catalog_id: None,
            api_key: None,
            status: JobStatus::Waiting,
            attempts_made: 0,
            max_attempts: 3,
            progress: Progress::default(),
            return_value: None,
            failure_reason: None,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}
