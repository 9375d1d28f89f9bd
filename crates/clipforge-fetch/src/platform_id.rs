//! Fetcher that drives an external downloader binary across a pool of egress identities.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use clipforge_core::{
    CancellationToken, ClipforgeError, ClipforgeResult, EgressAttempt, EgressIdentity, EgressPool,
    FetchOutcome, ImportStage, Job, Progress, ProgressSink, SelectedQuality, SourceFetcher,
    classify_child_stderr,
};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

const PRE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const FRAGMENT_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp", ".part-"];
const FRAGMENT_INFIX: &str = "part-Frag";

/// Tunables for the platform-id fetcher; defaults match the spec's
/// conservative selector (capped height, excludes HDR/experimental codecs).
#[derive(Debug, Clone)]
pub struct PlatformIdConfig {
    /// Path to the external downloader binary.
    pub downloader_binary: PathBuf,
    /// Hard ceiling on a single identity's download attempt.
    pub child_timeout: Duration,
    /// Minimum size, in bytes, a completed download must reach to be accepted.
    pub min_video_bytes: u64,
    /// Maximum vertical resolution to request from the downloader.
    pub max_height: u32,
}

impl PlatformIdConfig {
    /// Construct a config with the spec's defaults: 30-minute child timeout,
    /// 5 MiB minimum size, capped at 1080p.
    #[must_use]
    pub fn new(downloader_binary: impl Into<PathBuf>) -> Self {
        Self {
            downloader_binary: downloader_binary.into(),
            child_timeout: Duration::from_secs(30 * 60),
            min_video_bytes: 5 * 1024 * 1024,
            max_height: 1080,
        }
    }

    fn format_selector(&self) -> String {
        format!(
            "bestvideo[height<={h}][vcodec!*=av01][dynamic_range!*=HDR]+bestaudio/best[height<={h}]",
            h = self.max_height
        )
    }
}

/// Drives the external downloader binary, once per egress identity, until one
/// succeeds or the identity list is exhausted.
pub struct PlatformIdFetcher {
    config: PlatformIdConfig,
    egress_pool: Arc<dyn EgressPool>,
}

impl PlatformIdFetcher {
    /// Construct a fetcher against the given downloader config and egress identity pool.
    #[must_use]
    pub fn new(config: PlatformIdConfig, egress_pool: Arc<dyn EgressPool>) -> Self {
        Self { config, egress_pool }
    }

    async fn pre_probe(&self, source_ref: &str) -> Option<SelectedQuality> {
        let output = tokio::time::timeout(
            PRE_PROBE_TIMEOUT,
            Command::new(&self.config.downloader_binary)
                .arg("-f")
                .arg(self.config.format_selector())
                .arg("--skip-download")
                .arg("--print")
                .arg("%(format_id)s|%(resolution)s|%(fps)s|%(vcodec)s|%(acodec)s|%(format_note)s")
                .arg(source_ref)
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .ok()?
        .ok()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout.lines().next()?;
        parse_probe_line(first_line)
    }

    async fn attempt_identity(
        &self,
        job: &Job,
        identity: &EgressIdentity,
        dest_path: &Path,
        attempt_number: u32,
        total_identities: usize,
        cancellation: &CancellationToken,
        progress: &dyn ProgressSink,
        selected_quality: &mut Option<SelectedQuality>,
        egress_attempts: &mut Vec<EgressAttempt>,
    ) -> bool {
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut command = Command::new(&self.config.downloader_binary);
        command
            .arg("-f")
            .arg(self.config.format_selector())
            .arg("-o")
            .arg(dest_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !identity.url.is_empty() {
            command.arg("--proxy").arg(&identity.url);
        }
        command.arg(&job.source_ref);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                record_attempt(egress_attempts, identity, attempt_number, started_at, false, None, Some(err.to_string()));
                return false;
            }
        };

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push_str(&line);
                collected.push('\n');
            }
            collected
        });

        let read_stdout = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if cancellation.is_cancelled() {
                    break;
                }
                harvest_quality(selected_quality, &line);
                if let Some(percent) = parse_progress_percent(&line) {
                    let overall = rescale_progress(percent, attempt_number, total_identities);
                    progress
                        .report(Progress {
                            stage: Some(ImportStage::Downloading),
                            percentage: overall,
                            message: line.clone(),
                            egress_attempts: Some(egress_attempts.clone()),
                            selected_quality: selected_quality.clone(),
                        })
                        .await;
                }
            }
        };

        let wait_result = tokio::time::timeout(self.config.child_timeout, async {
            let (_, status) = tokio::join!(read_stdout, child.wait());
            status
        })
        .await;

        let response_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

        let succeeded = match wait_result {
            Ok(Ok(status)) if status.success() => {
                validate_downloaded_file(dest_path, self.config.min_video_bytes).await
            }
            _ => false,
        };

        if !succeeded {
            let _ = child.start_kill();
            cleanup_fragments(dest_path).await;
        }

        let stderr_text = stderr_task.await.unwrap_or_default();
        let error = if succeeded {
            None
        } else {
            let permanent = classify_child_stderr(&stderr_text);
            Some(permanent.map_or_else(|| "download attempt failed".to_string(), |err| err.to_string()))
        };

        record_attempt(
            egress_attempts,
            identity,
            attempt_number,
            started_at,
            succeeded,
            Some(response_ms),
            error,
        );

        self.egress_pool
            .report_result(&identity.url, succeeded, Some(response_ms))
            .await;

        succeeded
    }
}

fn record_attempt(
    attempts: &mut Vec<EgressAttempt>,
    identity: &EgressIdentity,
    attempt_number: u32,
    started_at: chrono::DateTime<Utc>,
    succeeded: bool,
    response_ms: Option<u64>,
    error: Option<String>,
) {
    attempts.push(EgressAttempt {
        identity_url: identity.url.clone(),
        attempt_number,
        started_at,
        ended_at: Some(Utc::now()),
        succeeded,
        response_ms,
        error,
    });
}

fn parse_probe_line(line: &str) -> Option<SelectedQuality> {
    let mut parts = line.splitn(6, '|');
    let format_id = parts.next()?.trim().to_string();
    let resolution = non_empty(parts.next());
    let fps = parts.next().and_then(|value| value.trim().parse::<u32>().ok());
    let vcodec = non_empty(parts.next());
    let acodec = non_empty(parts.next());
    let note = non_empty(parts.next());
    Some(SelectedQuality {
        format_id,
        resolution,
        fps,
        vcodec,
        acodec,
        note,
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty() && *v != "NA").map(str::to_string)
}

fn parse_progress_percent(line: &str) -> Option<f64> {
    let re = Regex::new(r"(\d+\.\d+)%").ok()?;
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

fn rescale_progress(download_pct: f64, identity_index: u32, total_identities: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let index_fraction = if total_identities == 0 {
        0.0
    } else {
        f64::from(identity_index - 1) / total_identities as f64
    };
    let overall = 10.0 + index_fraction * 15.0 + (download_pct / 100.0) * 75.0;
    overall.min(89.0)
}

fn harvest_quality(selected_quality: &mut Option<SelectedQuality>, line: &str) {
    let resolution_re = Regex::new(r"(\d{3,4})x(\d{3,4})").expect("valid regex");
    let fps_re = Regex::new(r"(\d{2,3})fps").expect("valid regex");
    const CODEC_TOKENS: &[&str] = &["vp09", "avc1", "av01", "opus", "mp4a", "aac"];

    let quality = selected_quality.get_or_insert_with(|| SelectedQuality {
        format_id: String::new(),
        resolution: None,
        fps: None,
        vcodec: None,
        acodec: None,
        note: None,
    });

    if quality.resolution.is_none() {
        if let Some(captures) = resolution_re.captures(line) {
            quality.resolution = Some(format!("{}x{}", &captures[1], &captures[2]));
        }
    }
    if quality.fps.is_none() {
        if let Some(captures) = fps_re.captures(line) {
            quality.fps = captures[1].parse().ok();
        }
    }
    for token in CODEC_TOKENS {
        if line.contains(token) {
            match *token {
                "opus" | "mp4a" | "aac" => quality.acodec.get_or_insert_with(|| (*token).to_string()),
                _ => quality.vcodec.get_or_insert_with(|| (*token).to_string()),
            };
        }
    }
}

async fn validate_downloaded_file(dest_path: &Path, min_video_bytes: u64) -> bool {
    if is_fragment_name(dest_path) {
        return false;
    }
    match tokio::fs::metadata(dest_path).await {
        Ok(metadata) => metadata.len() >= min_video_bytes,
        Err(_) => false,
    }
}

fn is_fragment_name(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return true;
    };
    FRAGMENT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) || name.contains(FRAGMENT_INFIX)
}

async fn cleanup_fragments(dest_path: &Path) {
    let Some(parent) = dest_path.parent() else {
        return;
    };
    let Some(stem) = dest_path.file_name().and_then(|name| name.to_str()) else {
        return;
    };
    let Ok(mut entries) = tokio::fs::read_dir(parent).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(stem)
            && (FRAGMENT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
                || name.contains(FRAGMENT_INFIX)
                || name == stem)
        {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }
}

#[async_trait]
impl SourceFetcher for PlatformIdFetcher {
    async fn fetch(
        &self,
        job: &Job,
        dest_path: &Path,
        cancellation: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> ClipforgeResult<FetchOutcome> {
        let mut selected_quality = self.pre_probe(&job.source_ref).await;
        let identities = self.egress_pool.list().await;
        let total = identities.len();
        let mut egress_attempts = Vec::with_capacity(total);

        for (index, identity) in identities.iter().enumerate() {
            if cancellation.is_cancelled() {
                return Err(ClipforgeError::ManualKill);
            }
            #[allow(clippy::cast_possible_truncation)]
            let attempt_number = (index + 1) as u32;
            let succeeded = self
                .attempt_identity(
                    job,
                    identity,
                    dest_path,
                    attempt_number,
                    total,
                    cancellation,
                    progress,
                    &mut selected_quality,
                    &mut egress_attempts,
                )
                .await;

            if succeeded {
                let metadata = tokio::fs::metadata(dest_path)
                    .await
                    .map_err(|err| ClipforgeError::internal(format!("stat downloaded file: {err}")))?;
                let file_name = job.file_name.clone().unwrap_or_else(|| {
                    dest_path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .unwrap_or("platform-download.bin")
                        .to_string()
                });
                progress
                    .report(Progress {
                        stage: Some(ImportStage::Downloading),
                        percentage: 90.0,
                        message: "download complete, promoting to upload".into(),
                        egress_attempts: Some(egress_attempts.clone()),
                        selected_quality: selected_quality.clone(),
                    })
                    .await;
                return Ok(FetchOutcome {
                    file_name,
                    size_bytes: metadata.len(),
                });
            }
        }

        Err(ClipforgeError::EgressExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_probe_line_splits_pipe_delimited_fields() {
        let quality = parse_probe_line("137|1920x1080|30|avc1|mp4a|hd").expect("parse");
        assert_eq!(quality.format_id, "137");
        assert_eq!(quality.resolution.as_deref(), Some("1920x1080"));
        assert_eq!(quality.fps, Some(30));
        assert_eq!(quality.vcodec.as_deref(), Some("avc1"));
        assert_eq!(quality.acodec.as_deref(), Some("mp4a"));
        assert_eq!(quality.note.as_deref(), Some("hd"));
    }

    #[test]
    fn parse_probe_line_treats_na_as_absent() {
        let quality = parse_probe_line("137|NA|NA|avc1|NA|NA").expect("parse");
        assert_eq!(quality.resolution, None);
        assert_eq!(quality.fps, None);
    }

    #[test]
    fn parse_progress_percent_extracts_decimal() {
        assert_eq!(parse_progress_percent("[download] 42.5% of 100MiB"), Some(42.5));
        assert_eq!(parse_progress_percent("no percent here"), None);
    }

    #[test]
    fn rescale_progress_clamps_to_89_percent() {
        let scaled = rescale_progress(100.0, 3, 3);
        assert!(scaled <= 89.0);
    }

    #[test]
    fn harvest_quality_fills_missing_fields_from_stdout() {
        let mut quality = None;
        harvest_quality(&mut quality, "merging formats 1280x720 30fps vp09 opus");
        let quality = quality.expect("quality populated");
        assert_eq!(quality.resolution.as_deref(), Some("1280x720"));
        assert_eq!(quality.fps, Some(30));
        assert_eq!(quality.vcodec.as_deref(), Some("vp09"));
        assert_eq!(quality.acodec.as_deref(), Some("opus"));
    }

    #[test]
    fn is_fragment_name_detects_known_suffixes_and_infix() {
        assert!(is_fragment_name(Path::new("/tmp/clip.mp4.part")));
        assert!(is_fragment_name(Path::new("/tmp/clip.mp4.part-Frag3")));
        assert!(!is_fragment_name(Path::new("/tmp/clip.mp4")));
    }
}
