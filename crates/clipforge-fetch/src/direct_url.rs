//! Streams a publicly reachable download URL to disk.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use clipforge_core::{
    CancellationToken, ClipforgeError, ClipforgeResult, FetchOutcome, ImportStage, Job, Progress,
    ProgressSink, RetryPolicy, SourceFetcher,
};
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const MAX_REDIRECTS: usize = 5;
const WRITE_CHUNK_PROGRESS_GRANULARITY_BYTES: u64 = 1024 * 1024;

/// Fetches a direct download URL with a bounded internal retry loop around
/// transient failures; permanent classifications (denied, not found, size
/// exceeded) short-circuit the loop immediately.
pub struct DirectUrlFetcher {
    client: Client,
    max_file_size_bytes: u64,
    retry_policy: RetryPolicy,
    max_attempts: u32,
}

impl DirectUrlFetcher {
    /// Construct a fetcher with the given cap, per-request timeout, retry
    /// policy, and maximum internal attempt count.
    ///
    /// # Panics
    ///
    /// Panics if the underlying HTTP client fails to build.
    #[must_use]
    pub fn new(
        max_file_size_bytes: u64,
        download_timeout: Duration,
        retry_policy: RetryPolicy,
        max_attempts: u32,
    ) -> Self {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(download_timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .expect("failed to build direct-url HTTP client");
        Self {
            client,
            max_file_size_bytes,
            retry_policy,
            max_attempts,
        }
    }

    async fn attempt(
        &self,
        job: &Job,
        dest_path: &Path,
        cancellation: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> ClipforgeResult<FetchOutcome> {
        let response = self
            .client
            .get(&job.source_ref)
            .send()
            .await
            .map_err(|err| classify_transport_error(&err))?;

        match response.status() {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => {}
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => return Err(ClipforgeError::SourceDenied),
            StatusCode::NOT_FOUND | StatusCode::GONE => return Err(ClipforgeError::SourceNotFound),
            status if status.is_server_error() => {
                return Err(ClipforgeError::SourceUnavailable { source: None });
            }
            status => {
                return Err(ClipforgeError::SourceInvalid {
                    detail: format!("unexpected status {status}"),
                });
            }
        }

        let content_length = response.content_length();
        if let Some(declared) = content_length {
            if declared > self.max_file_size_bytes {
                return Err(ClipforgeError::SizeExceeded {
                    limit_bytes: self.max_file_size_bytes,
                    actual_bytes: Some(declared),
                });
            }
        }

        let file_name = job
            .file_name
            .clone()
            .or_else(|| content_disposition_file_name(&response))
            .unwrap_or_else(|| url_basename(&job.source_ref));

        let mut file = tokio::fs::File::create(dest_path)
            .await
            .map_err(|err| ClipforgeError::internal(format!("create temp file: {err}")))?;

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut last_reported: u64 = 0;

        while let Some(chunk) = stream.next().await {
            if cancellation.is_cancelled() {
                let _ = tokio::fs::remove_file(dest_path).await;
                return Err(ClipforgeError::ManualKill);
            }

            let chunk = chunk.map_err(|err| classify_transport_error(&err))?;
            written += chunk.len() as u64;
            if written > self.max_file_size_bytes {
                let _ = tokio::fs::remove_file(dest_path).await;
                return Err(ClipforgeError::SizeExceeded {
                    limit_bytes: self.max_file_size_bytes,
                    actual_bytes: Some(written),
                });
            }

            file.write_all(&chunk)
                .await
                .map_err(|err| ClipforgeError::internal(format!("write temp file: {err}")))?;

            if written - last_reported >= WRITE_CHUNK_PROGRESS_GRANULARITY_BYTES {
                last_reported = written;
                #[allow(clippy::cast_precision_loss)]
                let percentage = content_length.map_or(0.0, |total| {
                    if total == 0 {
                        100.0
                    } else {
                        (written as f64 / total as f64 * 100.0).min(100.0)
                    }
                });
                progress
                    .report(Progress {
                        stage: Some(ImportStage::Downloading),
                        percentage,
                        message: format!("downloaded {written} bytes"),
                        egress_attempts: None,
                        selected_quality: None,
                    })
                    .await;
            }
        }

        file.flush()
            .await
            .map_err(|err| ClipforgeError::internal(format!("flush temp file: {err}")))?;

        progress
            .report(Progress {
                stage: Some(ImportStage::Downloading),
                percentage: 100.0,
                message: "download complete".into(),
                egress_attempts: None,
                selected_quality: None,
            })
            .await;

        Ok(FetchOutcome {
            file_name,
            size_bytes: written,
        })
    }
}

fn classify_transport_error(err: &reqwest::Error) -> ClipforgeError {
    ClipforgeError::SourceUnavailable {
        source: Some(Box::new(std::io::Error::other(err.to_string()))),
    }
}

fn content_disposition_file_name(response: &reqwest::Response) -> Option<String> {
    let header = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;
    header.split(';').find_map(|part| {
        let part = part.trim();
        let stripped = part
            .strip_prefix("filename*=UTF-8''")
            .or_else(|| part.strip_prefix("filename=\""))
            .or_else(|| part.strip_prefix("filename="))?;
        Some(stripped.trim_matches('"').to_string())
    })
}

fn url_basename(source_ref: &str) -> String {
    url::Url::parse(source_ref)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(std::iter::Iterator::last)
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "download.bin".to_string())
}

#[async_trait]
impl SourceFetcher for DirectUrlFetcher {
    async fn fetch(
        &self,
        job: &Job,
        dest_path: &Path,
        cancellation: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> ClipforgeResult<FetchOutcome> {
        let mut attempts_made = 0_u32;
        loop {
            match self.attempt(job, dest_path, cancellation, progress).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.retryable() && attempts_made + 1 < self.max_attempts => {
                    attempts_made += 1;
                    tokio::time::sleep(self.retry_policy.delay_for(attempts_made)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clipforge_core::{JobStatus, SourceKind};
    use httpmock::MockServer;
    use httpmock::prelude::*;
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

    fn job_for(source_ref: String) -> Job {
        Job {
            id: Uuid::new_v4(),
            request_id: "req-1".into(),
            source_kind: SourceKind::Url,
            source_ref,
            file_name: None,
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
    async fn fetch_retries_past_a_transient_500_then_succeeds() {
        let server = MockServer::start_async().await;
        let failing = server
            .mock_async(|when, then| {
                when.method(GET).path("/v.mp4");
                then.status(500);
            })
            .await;
        let body = vec![9_u8; 2048];
        let succeeding = server
            .mock_async(|when, then| {
                when.method(GET).path("/v.mp4");
                then.status(200).body(body.clone());
            })
            .await;

        let fetcher = DirectUrlFetcher::new(
            10 * 1024 * 1024,
            Duration::from_secs(5),
            RetryPolicy::new(Duration::from_millis(1), 1.0, Duration::from_millis(5)),
            3,
        );
        let job = job_for(server.url("/v.mp4"));
        let sink = RecordingSink::default();
        let cancellation = CancellationToken::new();
        let dest = tempfile::NamedTempFile::new().expect("temp file");

        let outcome = fetcher
            .fetch(&job, dest.path(), &cancellation, &sink)
            .await
            .expect("fetch should eventually succeed");
        assert_eq!(outcome.size_bytes, 2048);
        failing.assert_hits_async(1).await;
        succeeding.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn fetch_rejects_oversized_declared_length() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/big.mp4");
                then.status(200)
                    .header("Content-Length", "999999999")
                    .body(vec![1_u8; 16]);
            })
            .await;

        let fetcher = DirectUrlFetcher::new(
            1024,
            Duration::from_secs(5),
            RetryPolicy::default(),
            1,
        );
        let job = job_for(server.url("/big.mp4"));
        let sink = RecordingSink::default();
        let cancellation = CancellationToken::new();
        let dest = tempfile::NamedTempFile::new().expect("temp file");

        let err = fetcher
            .fetch(&job, dest.path(), &cancellation, &sink)
            .await
            .expect_err("expected size-exceeded");
        assert_eq!(err.kind(), clipforge_core::ErrorKind::SizeExceeded);
    }

    #[tokio::test]
    async fn fetch_maps_403_to_source_denied_without_retry() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/denied.mp4");
                then.status(403);
            })
            .await;

        let fetcher = DirectUrlFetcher::new(
            1024 * 1024,
            Duration::from_secs(5),
            RetryPolicy::default(),
            3,
        );
        let job = job_for(server.url("/denied.mp4"));
        let sink = RecordingSink::default();
        let cancellation = CancellationToken::new();
        let dest = tempfile::NamedTempFile::new().expect("temp file");

        let err = fetcher
            .fetch(&job, dest.path(), &cancellation, &sink)
            .await
            .expect_err("expected source-denied");
        assert_eq!(err.kind(), clipforge_core::ErrorKind::SourceDenied);
        mock.assert_hits_async(1).await;
    }

    #[test]
    fn url_basename_falls_back_when_path_empty() {
        assert_eq!(url_basename("https://example.com/"), "download.bin");
        assert_eq!(url_basename("https://example.com/a/b/clip.mp4"), "clip.mp4");
    }
}
