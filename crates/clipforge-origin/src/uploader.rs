//! Streaming `PUT` uploader for the content-delivery origin.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use clipforge_core::{
    CancellationToken, ClipforgeError, ClipforgeResult, Existence, ImportStage, OriginUploader,
    Progress, ProgressSink, UploadOutcome,
};
use reqwest::{Client, StatusCode};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

/// Buffer cap for file reads during upload; keeps memory use independent of file size.
const READ_CHUNK_BYTES: usize = 8 * 1024;
/// Minimum interval, in transferred bytes, between progress reports.
const PROGRESS_GRANULARITY_BYTES: u64 = 1024 * 1024;
const MAX_REDIRECTS: usize = 3;
const CDN_VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Streams local files to a zone-scoped object origin and manages their lifecycle there.
///
/// The upload path never buffers more than [`READ_CHUNK_BYTES`] of file
/// content at a time: a background task reads the file and feeds chunks into
/// a bounded channel that becomes the request body, while progress is
/// reported through a `watch` channel so a slow consumer can never stall the
/// reader.
pub struct HttpOriginUploader {
    client: Client,
    origin_base: String,
    zone: String,
    access_key: String,
    cdn_base: String,
    upload_timeout: Duration,
}

impl HttpOriginUploader {
    /// Construct an uploader against `origin_base`/`zone`, authenticating
    /// with `access_key`. `download_timeout` is doubled to derive the upload
    /// timeout, per the spec's "upload timeout ~= 2x download timeout" rule.
    ///
    /// # Panics
    ///
    /// Panics if the underlying HTTP client fails to build.
    #[must_use]
    pub fn new(
        origin_base: impl Into<String>,
        zone: impl Into<String>,
        access_key: impl Into<String>,
        cdn_base: impl Into<String>,
        download_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .expect("failed to build origin HTTP client");
        Self {
            client,
            origin_base: origin_base.into(),
            zone: zone.into(),
            access_key: access_key.into(),
            cdn_base: normalize_cdn_base(&cdn_base.into()),
            upload_timeout: download_timeout * 2,
        }
    }

    fn object_url(&self, object_name: &str) -> String {
        format!(
            "{}/{}/{object_name}",
            self.origin_base.trim_end_matches('/'),
            self.zone
        )
    }

    fn cdn_url(&self, object_name: &str) -> String {
        format!("{}/{object_name}", self.cdn_base)
    }
}

/// Normalize a CDN base URL: strip trailing slashes, default to `https://` when no scheme is given.
#[must_use]
pub fn normalize_cdn_base(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

async fn stream_file(
    path: &Path,
    body_tx: mpsc::Sender<std::io::Result<Bytes>>,
    progress_tx: watch::Sender<u64>,
    cancellation: CancellationToken,
) -> std::io::Result<()> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0_u8; READ_CHUNK_BYTES];
    let mut transferred: u64 = 0;
    let mut last_reported: u64 = 0;

    loop {
        if cancellation.is_cancelled() {
            break;
        }
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        transferred += read as u64;
        if body_tx.send(Ok(Bytes::copy_from_slice(&buf[..read]))).await.is_err() {
            break;
        }
        if transferred - last_reported >= PROGRESS_GRANULARITY_BYTES {
            last_reported = transferred;
            let _ = progress_tx.send(transferred);
        }
    }

    let _ = progress_tx.send(transferred);
    Ok(())
}

fn classify_send_error(err: reqwest::Error) -> ClipforgeError {
    ClipforgeError::OriginNetworkError {
        source: Box::new(err),
    }
}

#[async_trait]
impl OriginUploader for HttpOriginUploader {
    async fn upload(
        &self,
        local_path: &Path,
        object_name: &str,
        cancellation: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> ClipforgeResult<UploadOutcome> {
        let metadata = tokio::fs::metadata(local_path)
            .await
            .map_err(|err| ClipforgeError::internal(format!("stat upload source: {err}")))?;
        let size_bytes = metadata.len();

        let (body_tx, body_rx) = mpsc::channel::<std::io::Result<Bytes>>(4);
        let (progress_tx, mut progress_rx) = watch::channel::<u64>(0);

        let read_path = local_path.to_path_buf();
        let reader_cancellation = cancellation.clone();
        let reader_task = tokio::spawn(async move {
            if let Err(err) = stream_file(&read_path, body_tx, progress_tx, reader_cancellation).await {
                tracing::warn!(error = %err, "origin upload reader task failed");
            }
        });

        let body = reqwest::Body::wrap_stream(ReceiverStream::new(body_rx));
        let request = self
            .client
            .put(self.object_url(object_name))
            .header("AccessKey", &self.access_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, size_bytes)
            .timeout(self.upload_timeout)
            .body(body);

        let send_fut = request.send();
        tokio::pin!(send_fut);

        let send_result = loop {
            tokio::select! {
                result = &mut send_fut => break result,
                changed = progress_rx.changed() => {
                    if changed.is_ok() {
                        let transferred = *progress_rx.borrow();
                        #[allow(clippy::cast_precision_loss)]
                        let percentage = if size_bytes == 0 {
                            100.0
                        } else {
                            (transferred as f64 / size_bytes as f64 * 100.0).min(100.0)
                        };
                        progress
                            .report(Progress {
                                stage: Some(ImportStage::Uploading),
                                percentage,
                                message: format!("uploaded {transferred} of {size_bytes} bytes"),
                                egress_attempts: None,
                                selected_quality: None,
                            })
                            .await;
                    }
                    if cancellation.is_cancelled() {
                        reader_task.abort();
                        return Err(ClipforgeError::ManualKill);
                    }
                }
            }
        };

        let _ = reader_task.await;

        let response = send_result.map_err(classify_send_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClipforgeError::OriginApiError {
                status: status.as_u16(),
            });
        }

        progress
            .report(Progress {
                stage: Some(ImportStage::Uploading),
                percentage: 100.0,
                message: "upload complete".into(),
                egress_attempts: None,
                selected_quality: None,
            })
            .await;

        Ok(UploadOutcome {
            object_name: object_name.to_string(),
            cdn_url: self.cdn_url(object_name),
            size_bytes,
        })
    }

    async fn delete(&self, object_name: &str) -> ClipforgeResult<()> {
        let response = self
            .client
            .delete(self.object_url(object_name))
            .header("AccessKey", &self.access_key)
            .send()
            .await
            .map_err(classify_send_error)?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(ClipforgeError::OriginApiError {
                status: response.status().as_u16(),
            })
        }
    }

    async fn exists(&self, object_name: &str) -> Existence {
        let result = self
            .client
            .head(self.object_url(object_name))
            .header("AccessKey", &self.access_key)
            .send()
            .await;

        match result {
            Ok(response) if response.status() == StatusCode::OK => Existence::Yes,
            Ok(response) if response.status() == StatusCode::NOT_FOUND => Existence::No,
            Ok(_) | Err(_) => Existence::Error,
        }
    }

    async fn verify_cdn_access(&self, object_name: &str) -> bool {
        let result = self
            .client
            .head(self.cdn_url(object_name))
            .timeout(CDN_VERIFY_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(error = %err, object = %object_name, "cdn verification failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use httpmock::prelude::*;
    use std::io::Write;
    use std::sync::Mutex;

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

    #[test]
    fn normalize_cdn_base_strips_trailing_slash_and_defaults_scheme() {
        assert_eq!(normalize_cdn_base("cdn.example.com/"), "https://cdn.example.com");
        assert_eq!(
            normalize_cdn_base("http://cdn.example.com///"),
            "http://cdn.example.com"
        );
        assert_eq!(
            normalize_cdn_base("https://cdn.example.com"),
            "https://cdn.example.com"
        );
    }

    #[tokio::test]
    async fn upload_streams_file_and_reports_completion() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/zone/object.mp4")
                    .header("AccessKey", "key-123");
                then.status(200);
            })
            .await;

        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(&vec![7_u8; 64 * 1024]).expect("write temp file");

        let uploader = HttpOriginUploader::new(
            server.base_url(),
            "zone",
            "key-123",
            "cdn.example.com",
            Duration::from_secs(60),
        );
        let sink = RecordingSink::default();
        let cancellation = CancellationToken::new();

        let outcome = uploader
            .upload(file.path(), "object.mp4", &cancellation, &sink)
            .await
            .expect("upload should succeed");

        assert_eq!(outcome.size_bytes, 64 * 1024);
        assert_eq!(outcome.cdn_url, "https://cdn.example.com/object.mp4");
        mock.assert_async().await;

        let reports = sink.reports.lock().expect("lock poisoned");
        assert_eq!(reports.last().expect("final progress report").percentage, 100.0);
    }

    #[tokio::test]
    async fn upload_classifies_non_2xx_as_origin_api_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/zone/object.mp4");
                then.status(503);
            })
            .await;

        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(b"hello").expect("write temp file");

        let uploader = HttpOriginUploader::new(
            server.base_url(),
            "zone",
            "key-123",
            "cdn.example.com",
            Duration::from_secs(60),
        );
        let sink = RecordingSink::default();
        let cancellation = CancellationToken::new();

        let err = uploader
            .upload(file.path(), "object.mp4", &cancellation, &sink)
            .await
            .expect_err("expected origin api error");
        assert_eq!(err.kind(), clipforge_core::ErrorKind::OriginApiError);
    }

    #[tokio::test]
    async fn exists_maps_200_and_404_to_yes_and_no() {
        let server = MockServer::start_async().await;
        let present = server
            .mock_async(|when, then| {
                when.method(HEAD).path("/zone/present.mp4");
                then.status(200);
            })
            .await;
        let missing = server
            .mock_async(|when, then| {
                when.method(HEAD).path("/zone/missing.mp4");
                then.status(404);
            })
            .await;

        let uploader = HttpOriginUploader::new(
            server.base_url(),
            "zone",
            "key-123",
            "cdn.example.com",
            Duration::from_secs(60),
        );

        assert_eq!(uploader.exists("present.mp4").await, Existence::Yes);
        assert_eq!(uploader.exists("missing.mp4").await, Existence::No);
        present.assert_async().await;
        missing.assert_async().await;
    }
}
