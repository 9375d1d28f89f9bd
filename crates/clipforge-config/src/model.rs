//! Typed configuration object loaded once at process start.

use std::path::PathBuf;
use std::time::Duration;

/// Cloud-drive credentials: an API key, an OAuth refresh triple, or both.
///
/// [`Self::has_oauth`] lets callers prefer the OAuth path when present,
/// falling back to the bare API key otherwise.
#[derive(Debug, Clone, Default)]
pub struct CloudDriveCredentials {
    /// Simple API key usable for metadata lookups and public-file downloads.
    pub api_key: Option<String>,
    /// OAuth client id, paired with `oauth_client_secret`/`oauth_refresh_token`.
    pub oauth_client_id: Option<String>,
    /// OAuth client secret.
    pub oauth_client_secret: Option<String>,
    /// Long-lived OAuth refresh token exchanged for short-lived access tokens.
    pub oauth_refresh_token: Option<String>,
}

impl CloudDriveCredentials {
    /// Whether a complete OAuth refresh triple is present.
    #[must_use]
    pub const fn has_oauth(&self) -> bool {
        self.oauth_client_id.is_some()
            && self.oauth_client_secret.is_some()
            && self.oauth_refresh_token.is_some()
    }
}

/// Egress identity admin endpoint and the secret used to authenticate to it.
#[derive(Debug, Clone)]
pub struct AdminEndpoint {
    /// Base URL of the admin service (proxies, downloader control plane).
    pub base_url: String,
    /// Shared secret sent as `x-internal-secret`.
    pub internal_secret: String,
}

/// Downloader binary control-plane settings.
#[derive(Debug, Clone)]
pub struct DownloaderSettings {
    /// Path (or bare name resolved against `PATH`) of the downloader binary.
    pub binary_path: PathBuf,
    /// Release channel the binary should track (`stable`, `nightly`, ...).
    pub channel: String,
    /// Whether the binary is allowed to self-update.
    pub autoupdate: bool,
    /// How often to poll for a new release.
    pub update_frequency: Duration,
}

/// Full, validated configuration object for the import pipeline.
///
/// Built once via [`crate::loader::load_from_env`] and shared read-only
/// across the worker pool for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ClipforgeConfig {
    /// Object-storage zone (bucket-equivalent) videos are uploaded into.
    pub storage_zone: String,
    /// Access key presented to the origin storage API.
    pub storage_access_key: String,
    /// Public CDN base URL videos are served from after upload.
    pub cdn_base: String,
    /// Base URL of the storage origin's write API (distinct from `cdn_base`, the read path).
    pub storage_origin_base: String,
    /// Connection URL for the queue/KV backing store.
    pub queue_url: String,
    /// Optional error-tracker DSN; tracking is disabled when absent.
    pub error_tracker_dsn: Option<String>,
    /// Optional notification channel token (e.g. chat webhook bot token).
    pub notify_channel_token: Option<String>,
    /// Optional notification recipient (e.g. chat channel id).
    pub notify_recipient: Option<String>,
    /// Port the management surface listens on.
    pub listen_port: u16,
    /// Prefix applied to uploaded object names.
    pub upload_path_prefix: String,
    /// Directory used for in-flight download staging.
    pub temp_dir: PathBuf,
    /// Deployment environment label (`production`, `staging`, ...).
    pub environment: String,
    /// `tracing-subscriber` env-filter directive.
    pub log_level: String,
    /// Maximum number of attempts a job is retried before permanent failure.
    pub max_retry_attempts: u32,
    /// Wall-clock ceiling for a single job attempt.
    pub job_timeout: Duration,
    /// Interval between recovery-mirror sweeps.
    pub cleanup_interval: Duration,
    /// Maximum accepted source file size.
    pub max_file_size_bytes: u64,
    /// Worker pool concurrency: number of jobs processed at once.
    pub worker_concurrency: u32,
    /// Per-request HTTP download timeout.
    pub download_timeout: Duration,
    /// Soft heap ceiling the memory watchdog samples against.
    pub max_old_space_size_bytes: u64,
    /// Chunk size used when streaming bytes to and from disk.
    pub stream_buffer_size_bytes: usize,
    /// Rate-limit window for inbound submissions.
    pub rate_limit_window: Duration,
    /// Maximum submissions accepted per rate-limit window.
    pub rate_limit_max: u32,
    /// Cloud-drive credentials.
    pub cloud_drive: CloudDriveCredentials,
    /// Catalog webhook base URL.
    pub catalog_api_url: String,
    /// Catalog webhook bearer token.
    pub catalog_api_key: String,
    /// Egress identity admin endpoint.
    pub admin: AdminEndpoint,
    /// Downloader binary control-plane settings.
    pub downloader: DownloaderSettings,
}
