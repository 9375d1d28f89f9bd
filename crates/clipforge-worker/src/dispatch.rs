//! Maps a job's source kind onto the fetcher implementation that handles it.

use std::sync::Arc;

use clipforge_core::{EgressPool, SourceFetcher, SourceKind};
use clipforge_fetch::{CloudDriveConfig, CloudDriveFetcher, DirectUrlFetcher, LocalPassthroughFetcher, PlatformIdConfig, PlatformIdFetcher};

/// Constructed source fetchers, one per [`SourceKind`].
///
/// Built once at startup from [`clipforge_config::ClipforgeConfig`] and
/// shared read-only across every worker task.
pub struct FetcherRegistry {
    direct_url: DirectUrlFetcher,
    cloud_drive: CloudDriveFetcher,
    platform_id: PlatformIdFetcher,
    local: LocalPassthroughFetcher,
}

impl FetcherRegistry {
    /// Build a fetcher for every supported source kind from `config`, sharing
    /// `egress_pool` with the platform-id fetcher.
    #[must_use]
    pub fn new(config: &clipforge_config::ClipforgeConfig, egress_pool: Arc<dyn EgressPool>) -> Self {
        let direct_url = DirectUrlFetcher::new(
            config.max_file_size_bytes,
            config.download_timeout,
            clipforge_core::RetryPolicy::default(),
            3,
        );

        let cloud_drive_config = CloudDriveConfig {
            oauth_client_id: config.cloud_drive.oauth_client_id.clone(),
            oauth_client_secret: config.cloud_drive.oauth_client_secret.clone(),
            oauth_refresh_token: config.cloud_drive.oauth_refresh_token.clone(),
            ..CloudDriveConfig::google_defaults()
        };
        let cloud_drive = CloudDriveFetcher::new(
            cloud_drive_config,
            config.max_file_size_bytes,
            config.download_timeout,
        );

        let mut platform_id_config = PlatformIdConfig::new(config.downloader.binary_path.clone());
        platform_id_config.child_timeout = std::cmp::min(platform_id_config.child_timeout, config.download_timeout);
        let platform_id = PlatformIdFetcher::new(platform_id_config, egress_pool);

        Self {
            direct_url,
            cloud_drive,
            platform_id,
            local: LocalPassthroughFetcher,
        }
    }

    /// Select the fetcher implementing `kind`.
    #[must_use]
    pub fn for_kind(&self, kind: SourceKind) -> &dyn SourceFetcher {
        match kind {
            SourceKind::Url => &self.direct_url,
            SourceKind::Drive => &self.cloud_drive,
            SourceKind::Platform => &self.platform_id,
            SourceKind::Local => &self.local,
        }
    }
}
