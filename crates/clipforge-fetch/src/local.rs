//! Fetcher for sources already staged on local disk by the resumable-upload server.

use std::path::Path;

use async_trait::async_trait;
use clipforge_core::{
    CancellationToken, ClipforgeError, ClipforgeResult, FetchOutcome, ImportStage, Job, Progress,
    ProgressSink, SourceFetcher,
};

/// Moves a pre-staged upload into the worker's temp path so the rest of the
/// pipeline can treat it identically to a freshly downloaded file.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalPassthroughFetcher;

#[async_trait]
impl SourceFetcher for LocalPassthroughFetcher {
    async fn fetch(
        &self,
        job: &Job,
        dest_path: &Path,
        _cancellation: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> ClipforgeResult<FetchOutcome> {
        let source_path = Path::new(&job.source_ref);
        let metadata = tokio::fs::metadata(source_path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ClipforgeError::SourceNotFound
            } else {
                ClipforgeError::SourceInvalid {
                    detail: format!("cannot stat staged upload: {err}"),
                }
            }
        })?;

        let file_name = job.file_name.clone().unwrap_or_else(|| {
            source_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("upload.bin")
                .to_string()
        });

        tokio::fs::copy(source_path, dest_path).await.map_err(|err| {
            ClipforgeError::internal(format!("stage local upload at {}: {err}", dest_path.display()))
        })?;

        progress
            .report(Progress {
                stage: Some(ImportStage::Downloading),
                percentage: 100.0,
                message: "local upload already staged".into(),
                egress_attempts: None,
                selected_quality: None,
            })
            .await;

        Ok(FetchOutcome {
            file_name,
            size_bytes: metadata.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clipforge_core::{JobStatus, SourceKind};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<Progress>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn report(&self, progress: Progress) {
            self.reports.lock().expect("lock poisoned").push(progress);
        }
    }

    fn job_with_source(source_ref: String, file_name: Option<String>) -> Job {
        Job {
            id: Uuid::new_v4(),
            request_id: "req-1".into(),
            source_kind: SourceKind::Local,
            source_ref,
            file_name,
            catalog_id: None,
            api_key: None,
            status: JobStatus::Active,
            attempts_made: 0,
            max_attempts: 3,
            progress: Progress::default(),
            return_value: None,
            failure_reason: None,
            enqueued_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn fetch_reports_full_size_immediately() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        std::io::Write::write_all(&mut file, &vec![0_u8; 4096]).expect("write temp file");
        let job = job_with_source(
            file.path().to_str().expect("utf8 path").to_string(),
            Some("clip.mp4".into()),
        );
        let sink = RecordingSink::default();
        let cancellation = CancellationToken::new();
        let dest = tempfile::NamedTempFile::new().expect("dest temp file");

        let outcome = LocalPassthroughFetcher
            .fetch(&job, dest.path(), &cancellation, &sink)
            .await
            .expect("fetch should succeed");

        assert_eq!(outcome.size_bytes, 4096);
        assert_eq!(outcome.file_name, "clip.mp4");
        assert_eq!(
            tokio::fs::metadata(dest.path()).await.expect("dest exists").len(),
            4096
        );
        let reports = sink.reports.lock().expect("lock poisoned");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].percentage, 100.0);
    }

    #[tokio::test]
    async fn fetch_rejects_missing_path() {
        let job = job_with_source("/nonexistent/path/does-not-exist.mp4".into(), None);
        let sink = RecordingSink::default();
        let cancellation = CancellationToken::new();
        let dest = tempfile::NamedTempFile::new().expect("dest temp file");

        let err = LocalPassthroughFetcher
            .fetch(&job, dest.path(), &cancellation, &sink)
            .await
            .expect_err("expected source-not-found");
        assert_eq!(err.kind(), clipforge_core::ErrorKind::SourceNotFound);
    }
}
