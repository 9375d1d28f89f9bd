//! Output renderers and formatting helpers for CLI commands.

use clipforge_core::{Job, JobStatus};

use crate::cli::OutputFormat;
use crate::context::{CliError, CliResult};

pub(crate) fn render_job_list(jobs: &[Job], format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let text = serde_json::to_string_pretty(jobs)
                .map_err(|err| CliError::failure(anyhow::anyhow!("failed to format JSON: {err}")))?;
            println!("{text}");
        }
        OutputFormat::Table => {
            println!(
                "{:<36} {:<10} {:>6} {:>4}/{:<4} NAME",
                "ID", "STATUS", "PROG", "ATT", "MAX"
            );
            for job in jobs {
                let name = job.file_name.as_deref().unwrap_or(job.source_ref.as_str());
                println!(
                    "{:<36} {:<10} {:>5.1}% {:>4}/{:<4} {}",
                    job.id,
                    status_to_str(job.status),
                    job.progress.percentage,
                    job.attempts_made,
                    job.max_attempts,
                    name
                );
            }
        }
    }
    Ok(())
}

pub(crate) fn render_job_detail(job: &Job, logs: &[String], format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let text = serde_json::json!({ "job": job, "logs": logs });
            let text = serde_json::to_string_pretty(&text)
                .map_err(|err| CliError::failure(anyhow::anyhow!("failed to format JSON: {err}")))?;
            println!("{text}");
        }
        OutputFormat::Table => {
            println!("id: {}", job.id);
            println!("request_id: {}", job.request_id);
            println!("source: {:?} {}", job.source_kind, job.source_ref);
            if let Some(file_name) = &job.file_name {
                println!("file_name: {file_name}");
            }
            if let Some(catalog_id) = &job.catalog_id {
                println!("catalog_id: {catalog_id}");
            }
            println!("status: {}", status_to_str(job.status));
            println!("attempts: {}/{}", job.attempts_made, job.max_attempts);
            println!(
                "progress: {:.1}% ({})",
                job.progress.percentage, job.progress.message
            );
            if let Some(stage) = job.progress.stage {
                println!("stage: {stage:?}");
            }
            if let Some(result) = &job.return_value {
                println!("cdn_url: {}", result.cdn_url);
                println!("size: {}", format_bytes(result.size_bytes));
            }
            if let Some(reason) = &job.failure_reason {
                println!("failure_reason: {reason}");
            }
            println!("enqueued_at: {}", job.enqueued_at);
            if let Some(started_at) = job.started_at {
                println!("started_at: {started_at}");
            }
            if let Some(finished_at) = job.finished_at {
                println!("finished_at: {finished_at}");
            }
            if !logs.is_empty() {
                println!("logs:");
                for line in logs {
                    println!("  {line}");
                }
            }
        }
    }
    Ok(())
}

#[must_use]
pub(crate) const fn status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Waiting => "waiting",
        JobStatus::Active => "active",
        JobStatus::Delayed => "delayed",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    }
}

#[must_use]
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;
    let value = bytes_to_f64(bytes);
    if value >= GIB {
        format!("{:.2} GiB", value / GIB)
    } else if value >= MIB {
        format!("{:.2} MiB", value / MIB)
    } else if value >= KIB {
        format!("{:.2} KiB", value / KIB)
    } else {
        format!("{bytes} B")
    }
}

fn bytes_to_f64(value: u64) -> f64 {
    let high = u32::try_from(value >> 32).unwrap_or(u32::MAX);
    let low = u32::try_from(value & 0xFFFF_FFFF).unwrap_or(u32::MAX);
    f64::from(high) * 4_294_967_296.0 + f64::from(low)
}
