//! HTTP client implementing the external video catalog's webhook protocol.

use std::time::Duration;

use async_trait::async_trait;
use clipforge_core::{CatalogClient, ClipforgeError, ClipforgeResult};
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Catalog client backed by `reqwest`, talking to the four webhook endpoints
/// the catalog service exposes.
///
/// Call sites are expected to log and swallow the `Err` this returns rather
/// than let a webhook failure affect a job's terminal outcome; the `Result`
/// exists so the call itself is fallible and observable, not so its failure
/// propagates.
pub struct HttpCatalogClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpCatalogClient {
    /// Construct a client against `base_url` (e.g. `https://catalog.internal`)
    /// authenticating with `api_key` as a bearer token.
    ///
    /// # Panics
    ///
    /// Panics if the underlying HTTP client fails to build, which only
    /// happens when the TLS backend cannot be initialized.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .expect("failed to build catalog HTTP client");
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    async fn send<B: Serialize + Sync>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> ClipforgeResult<()> {
        let response = self
            .client
            .request(method, self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| ClipforgeError::internal(format!("catalog webhook transport error: {err}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClipforgeError::internal(format!(
                "catalog webhook returned status {}",
                response.status()
            )))
        }
    }
}

#[derive(Serialize)]
struct CreateVideoBody<'a> {
    name: &'a str,
    #[serde(rename = "sourceLink")]
    source_link: &'a str,
    #[serde(rename = "importJobId")]
    import_job_id: Uuid,
}

#[derive(Serialize)]
struct SourceLinkBody<'a> {
    #[serde(rename = "sourceLink")]
    source_link: &'a str,
    #[serde(rename = "importJobId")]
    import_job_id: Uuid,
}

#[derive(Serialize)]
struct ImportSuccessBody<'a> {
    #[serde(rename = "sourceLink")]
    source_link: &'a str,
    #[serde(rename = "isRetry")]
    is_retry: bool,
    #[serde(rename = "importJobId")]
    import_job_id: Uuid,
}

#[derive(Serialize)]
struct ImportFailureBody<'a> {
    error: &'a str,
    #[serde(rename = "sourceUrl")]
    source_url: &'a str,
    #[serde(rename = "retryCount")]
    retry_count: u32,
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn create_video(
        &self,
        name: &str,
        source_link: &str,
        import_job_id: Uuid,
    ) -> ClipforgeResult<()> {
        self.send(
            reqwest::Method::POST,
            "/user/videos",
            &CreateVideoBody {
                name,
                source_link,
                import_job_id,
            },
        )
        .await
    }

    async fn update_source_link(
        &self,
        catalog_id: &str,
        source_link: &str,
        import_job_id: Uuid,
    ) -> ClipforgeResult<()> {
        self.send(
            reqwest::Method::PUT,
            &format!("/user/videos/{catalog_id}/source-link"),
            &SourceLinkBody {
                source_link,
                import_job_id,
            },
        )
        .await
    }

    async fn report_import_success(
        &self,
        catalog_id: &str,
        source_link: &str,
        import_job_id: Uuid,
    ) -> ClipforgeResult<()> {
        self.send(
            reqwest::Method::POST,
            &format!("/user/videos/{catalog_id}/import-success"),
            &ImportSuccessBody {
                source_link,
                is_retry: true,
                import_job_id,
            },
        )
        .await
    }

    async fn report_import_failure(
        &self,
        catalog_id: &str,
        error: &str,
        source_url: &str,
        retry_count: u32,
    ) -> ClipforgeResult<()> {
        self.send(
            reqwest::Method::POST,
            &format!("/user/videos/{catalog_id}/import-failed"),
            &ImportFailureBody {
                error,
                source_url,
                retry_count,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn create_video_posts_expected_body() {
        let server = MockServer::start_async().await;
        let job_id = Uuid::new_v4();
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/user/videos")
                    .header("Authorization", "Bearer secret-key")
                    .json_body(serde_json::json!({
                        "name": "clip",
                        "sourceLink": "https://cdn.example/clip.mp4",
                        "importJobId": job_id,
                    }));
                then.status(200);
            })
            .await;

        let client = HttpCatalogClient::new(server.base_url(), "secret-key");
        client
            .create_video("clip", "https://cdn.example/clip.mp4", job_id)
            .await
            .expect("webhook should succeed");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_2xx_response_is_surfaced_as_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/user/videos");
                then.status(500);
            })
            .await;

        let client = HttpCatalogClient::new(server.base_url(), "secret-key");
        let result = client
            .create_video("clip", "https://cdn.example/clip.mp4", Uuid::new_v4())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn report_import_failure_hits_expected_path() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/user/videos/catalog-1/import-failed");
                then.status(204);
            })
            .await;

        let client = HttpCatalogClient::new(server.base_url(), "secret-key");
        client
            .report_import_failure("catalog-1", "egress exhausted", "https://example.com/v", 3)
            .await
            .expect("webhook should succeed");
        mock.assert_async().await;
    }
}
