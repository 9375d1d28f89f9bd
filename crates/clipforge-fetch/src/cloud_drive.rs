//! Fetcher for cloud-drive share links, with three authentication modes.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use clipforge_core::{
    CancellationToken, ClipforgeError, ClipforgeResult, FetchOutcome, ImportStage, Job,
    Progress, ProgressSink, SourceFetcher,
};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

const RECOGNIZED_VIDEO_MIME_PREFIXES: &[&str] = &["video/"];
const CONFIRM_PAGE_SAMPLE_BYTES: usize = 64 * 1024;

/// Credentials accepted by the cloud-drive fetcher, tried in priority order:
/// OAuth refresh token, then the per-job API key, then unauthenticated.
#[derive(Debug, Clone, Default)]
pub struct CloudDriveConfig {
    /// OAuth client id, required alongside `oauth_client_secret`/`oauth_refresh_token`.
    pub oauth_client_id: Option<String>,
    /// OAuth client secret.
    pub oauth_client_secret: Option<String>,
    /// Long-lived refresh token for the authenticated account used to bypass per-file quota.
    pub oauth_refresh_token: Option<String>,
    /// Drive API base, overridable in tests; defaults to the real Drive v3 API.
    pub api_base: String,
    /// OAuth token endpoint, overridable in tests.
    pub oauth_token_url: String,
    /// Public unauthenticated download host, overridable in tests.
    pub download_base: String,
}

impl CloudDriveConfig {
    /// Construct a config pointed at the real Google endpoints.
    #[must_use]
    pub fn google_defaults() -> Self {
        Self {
            oauth_client_id: None,
            oauth_client_secret: None,
            oauth_refresh_token: None,
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
            oauth_token_url: "https://oauth2.googleapis.com/token".to_string(),
            download_base: "https://drive.google.com".to_string(),
        }
    }

    fn has_oauth(&self) -> bool {
        self.oauth_client_id.is_some()
            && self.oauth_client_secret.is_some()
            && self.oauth_refresh_token.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct DriveMetadata {
    name: Option<String>,
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_u64_from_str")]
    size: Option<u64>,
}

fn deserialize_opt_u64_from_str<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|value| value.parse().ok()))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

enum AuthMode {
    OAuth { access_token: String },
    ApiKey(String),
    Unauthenticated,
}

/// Fetches a cloud-drive share link, trying OAuth, then API key, then the
/// public "confirm large file" interstitial, in that priority order.
pub struct CloudDriveFetcher {
    client: Client,
    config: CloudDriveConfig,
    max_file_size_bytes: u64,
}

impl CloudDriveFetcher {
    /// Construct a fetcher with the given credentials, size cap, and per-request timeout.
    ///
    /// # Panics
    ///
    /// Panics if the underlying HTTP client fails to build.
    #[must_use]
    pub fn new(config: CloudDriveConfig, max_file_size_bytes: u64, download_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(download_timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .expect("failed to build cloud-drive HTTP client");
        Self {
            client,
            config,
            max_file_size_bytes,
        }
    }

    async fn resolve_auth(&self, job: &Job) -> ClipforgeResult<AuthMode> {
        if self.config.has_oauth() {
            let access_token = self.exchange_refresh_token().await?;
            return Ok(AuthMode::OAuth { access_token });
        }
        if let Some(api_key) = &job.api_key {
            return Ok(AuthMode::ApiKey(api_key.clone()));
        }
        Ok(AuthMode::Unauthenticated)
    }

    async fn exchange_refresh_token(&self) -> ClipforgeResult<String> {
        let response = self
            .client
            .post(&self.config.oauth_token_url)
            .form(&[
                ("client_id", self.config.oauth_client_id.as_deref().unwrap_or_default()),
                (
                    "client_secret",
                    self.config.oauth_client_secret.as_deref().unwrap_or_default(),
                ),
                (
                    "refresh_token",
                    self.config.oauth_refresh_token.as_deref().unwrap_or_default(),
                ),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|err| ClipforgeError::SourceUnavailable {
                source: Some(Box::new(std::io::Error::other(err.to_string()))),
            })?;

        if !response.status().is_success() {
            return Err(ClipforgeError::SourceDenied);
        }

        response
            .json::<TokenResponse>()
            .await
            .map(|body| body.access_token)
            .map_err(|err| ClipforgeError::internal(format!("oauth token response undecodable: {err}")))
    }

    async fn fetch_metadata(&self, file_id: &str, auth: &AuthMode) -> Option<DriveMetadata> {
        let url = format!("{}/files/{file_id}", self.config.api_base);
        let mut request = self
            .client
            .get(url)
            .query(&[("fields", "name,size,mimeType")]);
        request = match auth {
            AuthMode::OAuth { access_token } => request.bearer_auth(access_token),
            AuthMode::ApiKey(key) => request.query(&[("key", key)]),
            AuthMode::Unauthenticated => request,
        };

        let response = request.send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json::<DriveMetadata>().await.ok()
    }

    async fn copy_file(&self, file_id: &str, access_token: &str) -> ClipforgeResult<String> {
        #[derive(Deserialize)]
        struct CopyResponse {
            id: String,
        }
        let url = format!("{}/files/{file_id}/copy", self.config.api_base);
        let response = self
            .client
            .post(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| classify_transport_error(&err))?;
        classify_status(response.status())?;
        response
            .json::<CopyResponse>()
            .await
            .map(|body| body.id)
            .map_err(|err| ClipforgeError::internal(format!("drive copy response undecodable: {err}")))
    }

    async fn delete_file_best_effort(&self, file_id: &str, access_token: &str) {
        let url = format!("{}/files/{file_id}", self.config.api_base);
        if let Err(err) = self.client.delete(url).bearer_auth(access_token).send().await {
            tracing::warn!(error = %err, file_id, "failed to clean up drive copy");
        }
    }

    async fn download_authenticated(
        &self,
        file_id: &str,
        access_token: &str,
        dest_path: &Path,
        cancellation: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> ClipforgeResult<u64> {
        let url = format!("{}/files/{file_id}", self.config.api_base);
        let response = self
            .client
            .get(url)
            .query(&[("alt", "media")])
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| classify_transport_error(&err))?;
        classify_status(response.status())?;
        stream_to_disk(response, dest_path, self.max_file_size_bytes, cancellation, progress).await
    }

    async fn download_api_key(
        &self,
        file_id: &str,
        api_key: &str,
        dest_path: &Path,
        cancellation: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> ClipforgeResult<u64> {
        let url = format!("{}/files/{file_id}", self.config.api_base);
        let response = self
            .client
            .get(url)
            .query(&[("alt", "media"), ("key", api_key)])
            .send()
            .await
            .map_err(|err| classify_transport_error(&err))?;
        classify_status(response.status())?;
        stream_to_disk(response, dest_path, self.max_file_size_bytes, cancellation, progress).await
    }

    async fn download_unauthenticated(
        &self,
        file_id: &str,
        dest_path: &Path,
        cancellation: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> ClipforgeResult<u64> {
        let url = format!("{}/uc", self.config.download_base);
        let mut response = self
            .client
            .get(&url)
            .query(&[("export", "download"), ("id", file_id)])
            .send()
            .await
            .map_err(|err| classify_transport_error(&err))?;
        classify_status(response.status())?;

        if is_html_interstitial(&response) {
            let body = response
                .text()
                .await
                .map_err(|err| classify_transport_error(&err))?;
            let sample: String = body.chars().take(CONFIRM_PAGE_SAMPLE_BYTES).collect();
            if sample.to_lowercase().contains("quota") {
                return Err(ClipforgeError::SourceQuota);
            }
            let confirm_target = extract_confirm_target(&sample, &url, file_id)
                .ok_or(ClipforgeError::SourceDenied)?;
            response = self
                .client
                .get(&confirm_target)
                .send()
                .await
                .map_err(|err| classify_transport_error(&err))?;
            classify_status(response.status())?;
        }

        stream_to_disk(response, dest_path, self.max_file_size_bytes, cancellation, progress).await
    }
}

fn classify_transport_error(err: &reqwest::Error) -> ClipforgeError {
    ClipforgeError::SourceUnavailable {
        source: Some(Box::new(std::io::Error::other(err.to_string()))),
    }
}

fn classify_status(status: StatusCode) -> ClipforgeResult<()> {
    match status {
        status if status.is_success() => Ok(()),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Err(ClipforgeError::SourceDenied),
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(ClipforgeError::SourceNotFound),
        StatusCode::TOO_MANY_REQUESTS => Err(ClipforgeError::SourceQuota),
        status if status.is_server_error() => Err(ClipforgeError::SourceUnavailable { source: None }),
        status => Err(ClipforgeError::SourceInvalid {
            detail: format!("unexpected drive status {status}"),
        }),
    }
}

fn is_html_interstitial(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("text/html"))
}

fn extract_confirm_target(html: &str, base_url: &str, file_id: &str) -> Option<String> {
    if html.to_lowercase().contains("quota") {
        return None;
    }
    let href_re = Regex::new(r#"href="(/uc\?export=download[^"]*)""#).ok()?;
    if let Some(captures) = href_re.captures(html) {
        let href = captures.get(1)?.as_str().replace("&amp;", "&");
        return Some(format!("https://drive.google.com{href}"));
    }
    let confirm_re = Regex::new(r"confirm=([0-9A-Za-z_-]+)").ok()?;
    let token = confirm_re.captures(html)?.get(1)?.as_str();
    Some(format!("{base_url}?export=download&confirm={token}&id={file_id}"))
}

async fn stream_to_disk(
    response: reqwest::Response,
    dest_path: &Path,
    max_file_size_bytes: u64,
    cancellation: &CancellationToken,
    progress: &dyn ProgressSink,
) -> ClipforgeResult<u64> {
    use futures_util::StreamExt;

    let content_length = response.content_length();
    if let Some(declared) = content_length {
        if declared > max_file_size_bytes {
            return Err(ClipforgeError::SizeExceeded {
                limit_bytes: max_file_size_bytes,
                actual_bytes: Some(declared),
            });
        }
    }

    let mut file = tokio::fs::File::create(dest_path)
        .await
        .map_err(|err| ClipforgeError::internal(format!("create temp file: {err}")))?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        if cancellation.is_cancelled() {
            let _ = tokio::fs::remove_file(dest_path).await;
            return Err(ClipforgeError::ManualKill);
        }
        let chunk = chunk.map_err(|err| classify_transport_error(&err))?;
        written += chunk.len() as u64;
        if written > max_file_size_bytes {
            let _ = tokio::fs::remove_file(dest_path).await;
            return Err(ClipforgeError::SizeExceeded {
                limit_bytes: max_file_size_bytes,
                actual_bytes: Some(written),
            });
        }
        file.write_all(&chunk)
            .await
            .map_err(|err| ClipforgeError::internal(format!("write temp file: {err}")))?;
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

    Ok(written)
}

/// Extract a file id from any of the share-URL patterns Drive emits.
fn extract_file_id(source_ref: &str) -> ClipforgeResult<String> {
    let patterns = [
        r"/file/d/([^/]+)",
        r"[?&]id=([^&]+)",
    ];
    for pattern in patterns {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(captures) = re.captures(source_ref) {
                if let Some(id) = captures.get(1) {
                    return Ok(id.as_str().to_string());
                }
            }
        }
    }
    Err(ClipforgeError::SourceInvalid {
        detail: format!("could not parse a drive file id out of {source_ref}"),
    })
}

fn is_recognized_video_mime(mime_type: &str) -> bool {
    RECOGNIZED_VIDEO_MIME_PREFIXES
        .iter()
        .any(|prefix| mime_type.starts_with(prefix))
}

#[async_trait]
impl SourceFetcher for CloudDriveFetcher {
    async fn fetch(
        &self,
        job: &Job,
        dest_path: &Path,
        cancellation: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> ClipforgeResult<FetchOutcome> {
        let file_id = extract_file_id(&job.source_ref)?;
        let auth = self.resolve_auth(job).await?;
        let metadata = self.fetch_metadata(&file_id, &auth).await;

        if let Some(metadata) = &metadata {
            if let Some(size) = metadata.size {
                if size > self.max_file_size_bytes {
                    return Err(ClipforgeError::SizeExceeded {
                        limit_bytes: self.max_file_size_bytes,
                        actual_bytes: Some(size),
                    });
                }
            }
            if let Some(mime_type) = &metadata.mime_type {
                if !is_recognized_video_mime(mime_type) {
                    return Err(ClipforgeError::SourceDenied);
                }
            }
        }

        let written = match auth {
            AuthMode::OAuth { access_token } => {
                let copy_id = self.copy_file(&file_id, &access_token).await?;
                let result = self
                    .download_authenticated(&copy_id, &access_token, dest_path, cancellation, progress)
                    .await;
                self.delete_file_best_effort(&copy_id, &access_token).await;
                result?
            }
            AuthMode::ApiKey(key) => {
                self.download_api_key(&file_id, &key, dest_path, cancellation, progress)
                    .await?
            }
            AuthMode::Unauthenticated => {
                self.download_unauthenticated(&file_id, dest_path, cancellation, progress)
                    .await?
            }
        };

        let file_name = job
            .file_name
            .clone()
            .or_else(|| metadata.and_then(|meta| meta.name))
            .unwrap_or_else(|| "drive-download.bin".to_string());

        Ok(FetchOutcome {
            file_name,
            size_bytes: written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_file_id_handles_all_known_patterns() {
        assert_eq!(
            extract_file_id("https://drive.google.com/file/d/abc123/view").unwrap(),
            "abc123"
        );
        assert_eq!(
            extract_file_id("https://drive.google.com/open?id=xyz789").unwrap(),
            "xyz789"
        );
        assert_eq!(
            extract_file_id("https://drive.google.com/uc?export=download&id=qqq111").unwrap(),
            "qqq111"
        );
    }

    #[test]
    fn extract_file_id_rejects_unrecognized_url() {
        assert!(extract_file_id("https://example.com/nope").is_err());
    }

    #[test]
    fn recognized_video_mime_requires_video_prefix() {
        assert!(is_recognized_video_mime("video/mp4"));
        assert!(!is_recognized_video_mime("application/pdf"));
    }

    #[test]
    fn extract_confirm_target_prefers_anchor_href() {
        let html = r#"<a href="/uc?export=download&amp;confirm=T0k&amp;id=abc">Download</a>"#;
        let target = extract_confirm_target(html, "https://drive.google.com/uc", "abc").unwrap();
        assert!(target.contains("confirm=T0k"));
    }

    #[test]
    fn extract_confirm_target_falls_back_to_bare_token() {
        let html = "Please retry with confirm=ZZ9 to continue.";
        let target = extract_confirm_target(html, "https://drive.google.com/uc", "abc").unwrap();
        assert!(target.contains("confirm=ZZ9"));
    }

    #[test]
    fn extract_confirm_target_refuses_quota_pages() {
        let html = "You have exceeded your download quota for this file.";
        assert!(extract_confirm_target(html, "https://drive.google.com/uc", "abc").is_none());
    }
}
