//! Per-job processing: fetch, upload, catalog notification, and cleanup.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use clipforge_core::{
    CancellationToken, CatalogClient, ClipforgeError, Job, JobCompletion, JobStatus, JobStore,
    OriginUploader, Progress, ProgressSink, Recovery, RecoveryState, SourceFetcher,
};
use clipforge_events::{Event, EventBus};
use uuid::Uuid;

use crate::dispatch::FetcherRegistry;

/// Shared, read-only dependencies every worker task processes jobs against.
pub struct WorkerContext {
    /// Durable job store and dispatcher.
    pub store: Arc<dyn JobStore>,
    /// Crash-recovery heartbeat mirror.
    pub recovery: Arc<dyn Recovery>,
    /// Source fetchers, one per source kind.
    pub fetchers: Arc<FetcherRegistry>,
    /// Origin uploader.
    pub uploader: Arc<dyn OriginUploader>,
    /// External catalog webhook client.
    pub catalog: Arc<dyn CatalogClient>,
    /// Directory new downloads are staged under.
    pub temp_dir: PathBuf,
    /// Prefix applied to uploaded object names.
    pub upload_path_prefix: String,
    /// Identifier this worker process reports to the store as its lease owner.
    pub worker_id: String,
    /// Broadcast bus external pollers can subscribe to for live job events.
    pub event_bus: Arc<EventBus>,
}

fn publish(bus: &EventBus, event: Event) {
    if let Err(err) = bus.publish(event) {
        tracing::debug!(event_kind = err.event_kind(), "event bus publish failed");
    }
}

const fn to_event_stage(stage: clipforge_core::ImportStage) -> clipforge_events::ImportStage {
    match stage {
        clipforge_core::ImportStage::Downloading => clipforge_events::ImportStage::Downloading,
        clipforge_core::ImportStage::Uploading => clipforge_events::ImportStage::Uploading,
        clipforge_core::ImportStage::Cleanup => clipforge_events::ImportStage::Cleanup,
    }
}

/// Forwards progress reports to the job store and the recovery mirror, and
/// remembers the latest snapshot so the caller can fold egress-attempt and
/// selected-quality detail into the final [`JobCompletion`].
struct JobProgressSink {
    job_id: Uuid,
    worker_id: String,
    store: Arc<dyn JobStore>,
    recovery: Arc<dyn Recovery>,
    event_bus: Arc<EventBus>,
    temp_files: Vec<String>,
    last: Mutex<Option<Progress>>,
}

impl JobProgressSink {
    fn new(
        job_id: Uuid,
        worker_id: String,
        store: Arc<dyn JobStore>,
        recovery: Arc<dyn Recovery>,
        event_bus: Arc<EventBus>,
        temp_files: Vec<String>,
    ) -> Self {
        Self {
            job_id,
            worker_id,
            store,
            recovery,
            event_bus,
            temp_files,
            last: Mutex::new(None),
        }
    }

    fn latest(&self) -> Option<Progress> {
        self.last.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl ProgressSink for JobProgressSink {
    async fn report(&self, progress: Progress) {
        *self.last.lock().expect("lock poisoned") = Some(progress.clone());

        if let Some(stage) = progress.stage {
            publish(
                &self.event_bus,
                Event::Progress {
                    job_id: self.job_id,
                    stage: to_event_stage(stage),
                    percentage: progress.percentage,
                    message: progress.message.clone(),
                },
            );
        }

        if let Err(err) = self.store.report_progress(self.job_id, progress.clone()).await {
            tracing::warn!(job_id = %self.job_id, error = %err, "failed to persist job progress");
        }
        if let Err(err) = self.store.extend_lease(self.job_id, &self.worker_id).await {
            tracing::warn!(job_id = %self.job_id, error = %err, "failed to extend job lease");
        }

        let state = RecoveryState {
            job_id: self.job_id,
            status: JobStatus::Active,
            progress,
            temp_files: self.temp_files.clone(),
            timestamp: Utc::now(),
        };
        if let Err(err) = self.recovery.heartbeat(state).await {
            tracing::warn!(job_id = %self.job_id, error = %err, "failed to refresh recovery heartbeat");
        }
    }
}

/// Builds the destination object name for an uploaded file: the fetched
/// file's basename with an 8-character random nonce spliced in before the
/// extension, so re-imports of the same source never collide at the origin.
fn object_name(upload_path_prefix: &str, file_name: &str) -> String {
    let nonce: String = {
        let raw = Uuid::new_v4().simple().to_string();
        raw[..8].to_string()
    };
    let path = Path::new(file_name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("download");
    let ext = path.extension().and_then(|s| s.to_str());
    let named = match ext {
        Some(ext) => format!("{stem}-{nonce}.{ext}"),
        None => format!("{stem}-{nonce}"),
    };
    format!("{}/{named}", upload_path_prefix.trim_matches('/'))
}

async fn notify_catalog_on_success(ctx: &WorkerContext, job: &Job, cdn_url: &str) {
    let Some(catalog_id) = job.catalog_id.as_deref() else {
        if let Err(err) = ctx.catalog.create_video(&job.request_id, cdn_url, job.id).await {
            tracing::warn!(job_id = %job.id, error = %err, "catalog create_video webhook failed");
        }
        return;
    };

    let result = if job.is_retry() {
        ctx.catalog.report_import_success(catalog_id, cdn_url, job.id).await
    } else {
        ctx.catalog.update_source_link(catalog_id, cdn_url, job.id).await
    };
    if let Err(err) = result {
        tracing::warn!(job_id = %job.id, error = %err, "catalog success webhook failed");
    }
}

async fn notify_catalog_on_terminal_failure(ctx: &WorkerContext, job: &Job, error: &ClipforgeError) {
    if !error.notifies_catalog_on_failure() {
        return;
    }
    let Some(catalog_id) = job.catalog_id.as_deref() else {
        return;
    };
    if let Err(err) = ctx
        .catalog
        .report_import_failure(catalog_id, &error.to_string(), &job.source_ref, job.attempts_made)
        .await
    {
        tracing::warn!(job_id = %job.id, error = %err, "catalog failure webhook failed");
    }
}

async fn cleanup_temp_file(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "failed to clean up temp file");
        }
    }
}

/// Leases having already been acquired, runs a single job end to end:
/// fetch, upload, catalog notification, store terminal transition, cleanup.
pub async fn process_job(ctx: &WorkerContext, job: Job, cancellation: CancellationToken) {
    publish(
        &ctx.event_bus,
        Event::StateChanged {
            job_id: job.id,
            state: clipforge_events::JobLifecycleState::Active,
            attempts_made: job.attempts_made,
        },
    );

    let dest_name = job
        .file_name
        .clone()
        .unwrap_or_else(|| format!("{}.bin", job.id));
    let dest_path = clipforge_fetch::nonce_path(&ctx.temp_dir, &dest_name);

    let register = ctx
        .recovery
        .heartbeat(RecoveryState {
            job_id: job.id,
            status: JobStatus::Active,
            progress: Progress::default(),
            temp_files: vec![dest_path.display().to_string()],
            timestamp: Utc::now(),
        })
        .await;
    if let Err(err) = register {
        tracing::warn!(job_id = %job.id, error = %err, "failed to register recovery temp file");
    }

    let sink = JobProgressSink::new(
        job.id,
        ctx.worker_id.clone(),
        Arc::clone(&ctx.store),
        Arc::clone(&ctx.recovery),
        Arc::clone(&ctx.event_bus),
        vec![dest_path.display().to_string()],
    );

    let fetcher = ctx.fetchers.for_kind(job.source_kind);
    let fetch_result = fetcher.fetch(&job, &dest_path, &cancellation, &sink).await;

    let fetch_outcome = match fetch_result {
        Ok(outcome) => outcome,
        Err(err) => {
            cleanup_temp_file(&dest_path).await;
            fail_job(ctx, &job, err).await;
            return;
        }
    };

    let object = object_name(&ctx.upload_path_prefix, &fetch_outcome.file_name);
    let upload_result = ctx
        .uploader
        .upload(&dest_path, &object, &cancellation, &sink)
        .await;

    let upload_outcome = match upload_result {
        Ok(outcome) => outcome,
        Err(err) => {
            cleanup_temp_file(&dest_path).await;
            fail_job(ctx, &job, err).await;
            return;
        }
    };

    let egress_attempts = sink.latest().and_then(|progress| progress.egress_attempts);
    let completion = JobCompletion {
        cdn_url: upload_outcome.cdn_url.clone(),
        file_name: upload_outcome.object_name,
        size_bytes: upload_outcome.size_bytes,
        attempts_made: job.attempts_made + 1,
        egress_attempts,
    };

    if let Err(err) = ctx.store.complete(job.id, completion).await {
        tracing::error!(job_id = %job.id, error = %err, "failed to record job completion");
    }
    publish(
        &ctx.event_bus,
        Event::Completed {
            job_id: job.id,
            cdn_url: upload_outcome.cdn_url.clone(),
        },
    );
    notify_catalog_on_success(ctx, &job, &upload_outcome.cdn_url).await;

    cleanup_temp_file(&dest_path).await;
    if let Err(err) = ctx.recovery.purge(job.id).await {
        tracing::warn!(job_id = %job.id, error = %err, "failed to purge recovery record");
    }
}

async fn fail_job(ctx: &WorkerContext, job: &Job, error: ClipforgeError) {
    let retryable = error.retryable();
    let exhausted = job.attempts_exhausted();
    let terminal = !retryable || exhausted;

    if let Err(err) = ctx.store.fail(job.id, error.to_string(), retryable).await {
        tracing::error!(job_id = %job.id, error = %err, "failed to record job failure");
    }
    publish(
        &ctx.event_bus,
        Event::Failed {
            job_id: job.id,
            reason: error.to_string(),
            retries_exhausted: terminal,
        },
    );

    if terminal {
        notify_catalog_on_terminal_failure(ctx, job, &error).await;
        if let Err(err) = ctx.recovery.purge(job.id).await {
            tracing::warn!(job_id = %job.id, error = %err, "failed to purge recovery record after terminal failure");
        }
    }
}

/// Polls the store until `job_id` is no longer active, then cancels `token`.
///
/// Grounds the spec's "operator kill raises a condition observed at the next
/// suspension point" semantics: [`clipforge_core::JobStore::kill_active`]
/// transitions the row out of `active` directly, so a worker holding the
/// lease only learns about it by re-checking status.
pub async fn watch_for_kill(
    store: Arc<dyn JobStore>,
    job_id: Uuid,
    token: CancellationToken,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        if token.is_cancelled() {
            return;
        }
        match store.get(job_id).await {
            Ok(Some(job)) if job.status != JobStatus::Active => {
                token.cancel();
                return;
            }
            Ok(None) => {
                token.cancel();
                return;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_name_splices_nonce_before_extension() {
        let name = object_name("imports", "movie.mp4");
        assert!(name.starts_with("imports/movie-"));
        assert!(name.ends_with(".mp4"));
    }

    #[test]
    fn object_name_handles_missing_extension() {
        let name = object_name("imports", "movie");
        assert!(name.starts_with("imports/movie-"));
        assert!(!name.contains('.'));
    }

    #[test]
    fn object_name_trims_prefix_slashes() {
        let name = object_name("/imports/", "clip.mov");
        assert!(name.starts_with("imports/clip-"));
    }
}
