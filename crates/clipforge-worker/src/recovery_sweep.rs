//! Stall recovery on startup: reconciles recovery-mirror records against
//! current job-store state after a crash or restart.

use clipforge_core::{JobStatus, JobStore, Recovery};

/// Scans the recovery mirror for stale heartbeats and reconciles each
/// against the job store's current view:
///
/// - the job is gone or completed: purge the mirror record
/// - the job is active or waiting: leave it alone, a worker still owns it
/// - the job is failed or delayed: re-arm it for another attempt
/// - the mirror record itself can't be read: purge it unconditionally
pub async fn run(store: &dyn JobStore, recovery: &dyn Recovery) {
    let stale = match recovery.scan_stalled().await {
        Ok(stale) => stale,
        Err(err) => {
            tracing::error!(error = %err, "stall recovery sweep could not scan recovery mirror");
            return;
        }
    };

    if stale.is_empty() {
        return;
    }
    tracing::info!(count = stale.len(), "stall recovery sweep starting");

    for state in stale {
        match store.get(state.job_id).await {
            Ok(Some(job)) if job.status == JobStatus::Completed => {
                purge(recovery, state.job_id).await;
            }
            Ok(Some(job)) if matches!(job.status, JobStatus::Active | JobStatus::Waiting) => {
                tracing::debug!(job_id = %state.job_id, status = ?job.status, "leaving recovered job in place");
            }
            Ok(Some(job)) if matches!(job.status, JobStatus::Failed | JobStatus::Delayed) => {
                if let Err(err) = store.retry(state.job_id).await {
                    tracing::warn!(job_id = %state.job_id, error = %err, "failed to re-arm stalled job");
                } else {
                    tracing::info!(job_id = %state.job_id, "re-armed stalled job for another attempt");
                }
            }
            Ok(Some(_)) | Ok(None) => {
                purge(recovery, state.job_id).await;
            }
            Err(err) => {
                tracing::warn!(job_id = %state.job_id, error = %err, "could not read job state for recovery record, purging");
                purge(recovery, state.job_id).await;
            }
        }
    }
}

async fn purge(recovery: &dyn Recovery, job_id: uuid::Uuid) {
    if let Err(err) = recovery.purge(job_id).await {
        tracing::warn!(job_id = %job_id, error = %err, "failed to purge recovery record");
    }
}
