//! Event payload types carried across the platform.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identifier assigned to each event emitted by the platform.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Pipeline stage a job is currently executing, mirrored in `Progress` events.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportStage {
    /// Source fetcher is pulling bytes onto local disk.
    Downloading,
    /// Origin uploader is streaming the local file to the CDN origin.
    Uploading,
    /// Temp files are being reclaimed after a terminal transition.
    Cleanup,
}

/// Lifecycle state of a job as tracked by the job store.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobLifecycleState {
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

/// Typed domain events surfaced across the system.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A job was admitted into the waiting queue.
    JobEnqueued {
        /// Identifier for the job (the caller's `request_id`).
        job_id: Uuid,
    },
    /// A job transitioned into a new lifecycle state.
    StateChanged {
        /// Identifier for the job whose state changed.
        job_id: Uuid,
        /// Updated lifecycle state.
        state: JobLifecycleState,
        /// Attempt number in effect at the time of the transition.
        attempts_made: u32,
    },
    /// Progress was reported for a job currently being processed.
    Progress {
        /// Identifier for the job being tracked.
        job_id: Uuid,
        /// Pipeline stage the progress applies to.
        stage: ImportStage,
        /// Completion percentage in `[0, 100]`.
        percentage: f64,
        /// Human-readable status message.
        message: String,
    },
    /// An egress identity was tried while downloading a platform-id source.
    EgressAttemptRecorded {
        /// Identifier for the job the attempt belongs to.
        job_id: Uuid,
        /// Egress identity url used for the attempt (redacted of credentials).
        identity_url: String,
        /// 1-based attempt number within the job's current execution.
        attempt_number: u32,
        /// Whether the attempt through this identity succeeded.
        succeeded: bool,
    },
    /// A job completed successfully and was deposited at the origin.
    Completed {
        /// Identifier for the completed job.
        job_id: Uuid,
        /// Public CDN url the object is now reachable at.
        cdn_url: String,
    },
    /// A job reached a terminal failure.
    Failed {
        /// Identifier for the failed job.
        job_id: Uuid,
        /// Human-readable failure reason.
        reason: String,
        /// Whether the failure had exhausted its retry budget.
        retries_exhausted: bool,
    },
    /// System health status changed (egress pool degraded, origin unreachable, etc).
    HealthChanged {
        /// Components currently considered degraded.
        degraded: Vec<String>,
    },
    /// A background refresh of cached configuration (e.g. the egress identity list) completed.
    SettingsChanged {
        /// Description of what was refreshed.
        description: String,
    },
}

impl Event {
    /// Machine-friendly discriminator for SSE consumers and log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::JobEnqueued { .. } => "job_enqueued",
            Self::StateChanged { .. } => "state_changed",
            Self::Progress { .. } => "progress",
            Self::EgressAttemptRecorded { .. } => "egress_attempt_recorded",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::HealthChanged { .. } => "health_changed",
            Self::SettingsChanged { .. } => "settings_changed",
        }
    }

    /// Job identifier carried by the event, when the event concerns a single job.
    #[must_use]
    pub const fn job_id(&self) -> Option<Uuid> {
        match self {
            Self::JobEnqueued { job_id }
            | Self::StateChanged { job_id, .. }
            | Self::Progress { job_id, .. }
            | Self::EgressAttemptRecorded { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. } => Some(*job_id),
            Self::HealthChanged { .. } | Self::SettingsChanged { .. } => None,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_event_kind(event: &Event, expected: &str) {
        assert_eq!(event.kind(), expected);
    }

    #[test]
    fn event_kind_maps_job_variants() {
        let job_id = Uuid::nil();
        assert_event_kind(&Event::JobEnqueued { job_id }, "job_enqueued");
        assert_event_kind(
            &Event::StateChanged {
                job_id,
                state: JobLifecycleState::Active,
                attempts_made: 0,
            },
            "state_changed",
        );
        assert_event_kind(
            &Event::Progress {
                job_id,
                stage: ImportStage::Downloading,
                percentage: 10.0,
                message: "starting".into(),
            },
            "progress",
        );
        assert_event_kind(
            &Event::EgressAttemptRecorded {
                job_id,
                identity_url: "proxy-a".into(),
                attempt_number: 1,
                succeeded: false,
            },
            "egress_attempt_recorded",
        );
        assert_event_kind(
            &Event::Completed {
                job_id,
                cdn_url: "https://cdn.example/x".into(),
            },
            "completed",
        );
        assert_event_kind(
            &Event::Failed {
                job_id,
                reason: "boom".into(),
                retries_exhausted: true,
            },
            "failed",
        );
    }

    #[test]
    fn event_kind_maps_system_variants() {
        assert_event_kind(
            &Event::HealthChanged {
                degraded: vec!["egress-pool".into()],
            },
            "health_changed",
        );
        assert_event_kind(
            &Event::SettingsChanged {
                description: "egress identities refreshed".into(),
            },
            "settings_changed",
        );
    }

    #[test]
    fn job_id_is_none_for_system_events() {
        assert_eq!(Event::HealthChanged { degraded: vec![] }.job_id(), None);
        assert_eq!(
            Event::JobEnqueued { job_id: Uuid::nil() }.job_id(),
            Some(Uuid::nil())
        );
    }
}
