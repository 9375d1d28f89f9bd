//! Environment-variable parsing for [`ClipforgeConfig`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{AdminEndpoint, ClipforgeConfig, CloudDriveCredentials, DownloaderSettings};

fn required(name: &'static str) -> ConfigResult<String> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar { name })
}

fn optional(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn with_default(name: &'static str, default: &str) -> String {
    optional(name).unwrap_or_else(|| default.to_string())
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw.parse().map_err(|err: T::Err| ConfigError::InvalidVar {
            name,
            detail: err.to_string(),
        }),
        None => Ok(default),
    }
}

fn bool_flag(name: &'static str, default: bool) -> ConfigResult<bool> {
    match optional(name) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidVar {
                name,
                detail: format!("expected a boolean, got '{other}'"),
            }),
        },
        None => Ok(default),
    }
}

/// Load and validate [`ClipforgeConfig`] from the process environment.
///
/// # Errors
///
/// Returns [`ConfigError::MissingVar`] for unset required variables,
/// [`ConfigError::InvalidVar`] for variables that fail to parse, and
/// [`ConfigError::Invalid`] for values that parse individually but violate
/// a cross-field constraint.
pub fn load_from_env() -> ConfigResult<ClipforgeConfig> {
    let max_retry_attempts = parsed("CLIPFORGE_MAX_RETRY_ATTEMPTS", 5)?;
    let job_timeout_ms = parsed::<u64>("CLIPFORGE_JOB_TIMEOUT_MS", 35 * 60 * 1000)?;
    let cleanup_interval_ms = parsed::<u64>("CLIPFORGE_CLEANUP_INTERVAL_MS", 60_000)?;
    let max_file_size_mb = parsed::<u64>("CLIPFORGE_MAX_FILE_SIZE_MB", 2048)?;
    let download_timeout_ms = parsed::<u64>("CLIPFORGE_DOWNLOAD_TIMEOUT_MS", 2 * 60 * 60 * 1000)?;
    let max_old_space_size_mb = parsed::<u64>("CLIPFORGE_MAX_OLD_SPACE_SIZE_MB", 1536)?;
    let stream_buffer_size_kb = parsed::<u64>("CLIPFORGE_STREAM_BUFFER_SIZE_KB", 64)?;
    let rate_limit_window_ms = parsed::<u64>("CLIPFORGE_RATE_LIMIT_WINDOW_MS", 60_000)?;
    let rate_limit_max = parsed("CLIPFORGE_RATE_LIMIT_MAX", 30)?;
    let listen_port = parsed("CLIPFORGE_LISTEN_PORT", 8080)?;
    let worker_concurrency = parsed("CLIPFORGE_WORKER_CONCURRENCY", 5)?;

    if max_retry_attempts == 0 {
        return Err(ConfigError::Invalid {
            detail: "CLIPFORGE_MAX_RETRY_ATTEMPTS must be at least 1".into(),
        });
    }
    if max_file_size_mb == 0 {
        return Err(ConfigError::Invalid {
            detail: "CLIPFORGE_MAX_FILE_SIZE_MB must be greater than zero".into(),
        });
    }
    if worker_concurrency == 0 {
        return Err(ConfigError::Invalid {
            detail: "CLIPFORGE_WORKER_CONCURRENCY must be at least 1".into(),
        });
    }

    let config = ClipforgeConfig {
        storage_zone: required("CLIPFORGE_STORAGE_ZONE")?,
        storage_access_key: required("CLIPFORGE_STORAGE_ACCESS_KEY")?,
        cdn_base: required("CLIPFORGE_CDN_BASE")?,
        storage_origin_base: with_default(
            "CLIPFORGE_STORAGE_ORIGIN_BASE",
            "https://storage.bunnycdn.com",
        ),
        queue_url: required("CLIPFORGE_QUEUE_URL")?,
        error_tracker_dsn: optional("CLIPFORGE_ERROR_TRACKER_DSN"),
        notify_channel_token: optional("CLIPFORGE_NOTIFY_CHANNEL_TOKEN"),
        notify_recipient: optional("CLIPFORGE_NOTIFY_RECIPIENT"),
        listen_port,
        upload_path_prefix: with_default("CLIPFORGE_UPLOAD_PATH_PREFIX", "imports"),
        temp_dir: PathBuf::from(with_default("CLIPFORGE_TEMP_DIR", "/tmp/clipforge")),
        environment: with_default("CLIPFORGE_ENVIRONMENT", "development"),
        log_level: with_default("CLIPFORGE_LOG_LEVEL", "info"),
        max_retry_attempts,
        job_timeout: Duration::from_millis(job_timeout_ms),
        cleanup_interval: Duration::from_millis(cleanup_interval_ms),
        max_file_size_bytes: max_file_size_mb * 1024 * 1024,
        worker_concurrency,
        download_timeout: Duration::from_millis(download_timeout_ms),
        max_old_space_size_bytes: max_old_space_size_mb * 1024 * 1024,
        stream_buffer_size_bytes: usize::try_from(stream_buffer_size_kb * 1024)
            .unwrap_or(64 * 1024),
        rate_limit_window: Duration::from_millis(rate_limit_window_ms),
        rate_limit_max,
        cloud_drive: CloudDriveCredentials {
            api_key: optional("CLIPFORGE_DRIVE_API_KEY"),
            oauth_client_id: optional("CLIPFORGE_DRIVE_OAUTH_CLIENT_ID"),
            oauth_client_secret: optional("CLIPFORGE_DRIVE_OAUTH_CLIENT_SECRET"),
            oauth_refresh_token: optional("CLIPFORGE_DRIVE_OAUTH_REFRESH_TOKEN"),
        },
        catalog_api_url: required("CLIPFORGE_CATALOG_API_URL")?,
        catalog_api_key: required("CLIPFORGE_CATALOG_API_KEY")?,
        admin: AdminEndpoint {
            base_url: required("CLIPFORGE_ADMIN_BASE_URL")?,
            internal_secret: required("CLIPFORGE_ADMIN_INTERNAL_SECRET")?,
        },
        downloader: DownloaderSettings {
            binary_path: PathBuf::from(with_default("CLIPFORGE_DOWNLOADER_BINARY", "yt-dlp")),
            channel: with_default("CLIPFORGE_DOWNLOADER_CHANNEL", "stable"),
            autoupdate: bool_flag("CLIPFORGE_DOWNLOADER_AUTOUPDATE", true)?,
            update_frequency: Duration::from_millis(parsed::<u64>(
                "CLIPFORGE_DOWNLOADER_UPDATE_FREQUENCY_MS",
                24 * 60 * 60 * 1000,
            )?),
        },
    };

    tracing::info!(
        environment = %config.environment,
        storage_zone = %config.storage_zone,
        max_retry_attempts = config.max_retry_attempts,
        "loaded configuration"
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const REQUIRED_VARS: &[(&str, &str)] = &[
        ("CLIPFORGE_STORAGE_ZONE", "videos"),
        ("CLIPFORGE_STORAGE_ACCESS_KEY", "test-key"),
        ("CLIPFORGE_CDN_BASE", "https://cdn.example.com"),
        ("CLIPFORGE_QUEUE_URL", "redis://localhost:6379"),
        ("CLIPFORGE_CATALOG_API_URL", "https://catalog.example.com"),
        ("CLIPFORGE_CATALOG_API_KEY", "catalog-key"),
        ("CLIPFORGE_ADMIN_BASE_URL", "https://admin.example.com"),
        ("CLIPFORGE_ADMIN_INTERNAL_SECRET", "admin-secret"),
    ];

    fn with_required_vars<T>(body: impl FnOnce() -> T) -> T {
        for (name, value) in REQUIRED_VARS {
            unsafe { std::env::set_var(name, value) };
        }
        let result = body();
        for (name, _) in REQUIRED_VARS {
            unsafe { std::env::remove_var(name) };
        }
        result
    }

    #[test]
    #[serial]
    fn load_from_env_fails_when_a_required_var_is_missing() {
        let err = load_from_env().expect_err("expected missing-var error");
        assert!(matches!(err, ConfigError::MissingVar { .. }));
    }

    #[test]
    #[serial]
    fn load_from_env_succeeds_with_defaults_once_required_vars_are_set() {
        let config = with_required_vars(|| load_from_env().expect("should load"));
        assert_eq!(config.storage_zone, "videos");
        assert_eq!(config.max_retry_attempts, 5);
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.stream_buffer_size_bytes, 64 * 1024);
        assert!(config.downloader.autoupdate);
        assert!(!config.cloud_drive.has_oauth());
    }

    #[test]
    #[serial]
    fn load_from_env_rejects_zero_retry_attempts() {
        let err = with_required_vars(|| {
            unsafe { std::env::set_var("CLIPFORGE_MAX_RETRY_ATTEMPTS", "0") };
            let result = load_from_env();
            unsafe { std::env::remove_var("CLIPFORGE_MAX_RETRY_ATTEMPTS") };
            result
        })
        .expect_err("expected validation error");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    #[serial]
    fn load_from_env_rejects_unparseable_numeric_override() {
        let err = with_required_vars(|| {
            unsafe { std::env::set_var("CLIPFORGE_LISTEN_PORT", "not-a-port") };
            let result = load_from_env();
            unsafe { std::env::remove_var("CLIPFORGE_LISTEN_PORT") };
            result
        })
        .expect_err("expected invalid-var error");
        assert!(matches!(err, ConfigError::InvalidVar { name, .. } if name == "CLIPFORGE_LISTEN_PORT"));
    }
}
