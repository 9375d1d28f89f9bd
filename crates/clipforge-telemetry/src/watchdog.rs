//! Memory watchdog: samples process RSS against a configured ceiling and
//! logs warnings as usage climbs, without ever killing the process itself.
//!
//! # Design
//! - Sampling, not enforcement: the watchdog is diagnostic. Deciding what to
//!   do about high memory (shed load, restart) is left to the deployment's
//!   process supervisor.
//! - Crossing a threshold logs once per crossing, not once per sample, so a
//!   process sitting just above 85% doesn't spam the log every tick.

use std::time::Duration;

use sysinfo::{Pid, System};

use crate::metrics::Metrics;

/// Fraction of the configured ceiling that triggers a warning-level log.
pub const WARNING_THRESHOLD: f64 = 0.85;
/// Fraction of the configured ceiling that triggers a critical-level log.
pub const CRITICAL_THRESHOLD: f64 = 0.95;
/// Default sampling interval.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// Severity bucket a single memory sample falls into relative to the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogLevel {
    /// Usage is below the warning threshold.
    Nominal,
    /// Usage is at or above [`WARNING_THRESHOLD`] but below [`CRITICAL_THRESHOLD`].
    Warning,
    /// Usage is at or above [`CRITICAL_THRESHOLD`].
    Critical,
}

/// Classify `used_bytes` against `cap_bytes`.
#[must_use]
pub fn classify(used_bytes: u64, cap_bytes: u64) -> WatchdogLevel {
    if cap_bytes == 0 {
        return WatchdogLevel::Nominal;
    }
    #[allow(clippy::cast_precision_loss)]
    let fraction = used_bytes as f64 / cap_bytes as f64;
    if fraction >= CRITICAL_THRESHOLD {
        WatchdogLevel::Critical
    } else if fraction >= WARNING_THRESHOLD {
        WatchdogLevel::Warning
    } else {
        WatchdogLevel::Nominal
    }
}

/// Periodically samples this process's resident memory and reports it
/// through `metrics`, logging when the configured cap is approached.
///
/// Runs until `shutdown` resolves. Intended to be spawned as a background
/// task (`tokio::spawn`) alongside the worker pool; never exits on its own
/// and never terminates the process regardless of how high usage climbs.
pub async fn run(cap_bytes: u64, interval: Duration, metrics: Metrics, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    let mut last_level = WatchdogLevel::Nominal;
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        system.refresh_process(pid);
        let Some(process) = system.process(pid) else {
            tracing::warn!("memory watchdog could not read process stats");
            continue;
        };
        let used_bytes = process.memory();
        metrics.set_memory_bytes(i64::try_from(used_bytes).unwrap_or(i64::MAX));

        let level = classify(used_bytes, cap_bytes);
        match (level, last_level) {
            (WatchdogLevel::Critical, previous) if previous != WatchdogLevel::Critical => {
                metrics.inc_memory_watchdog_critical();
                tracing::error!(
                    used_bytes,
                    cap_bytes,
                    "memory usage at or above critical threshold; requesting a GC-equivalent pause point"
                );
            }
            (WatchdogLevel::Warning, previous) if previous == WatchdogLevel::Nominal => {
                metrics.inc_memory_watchdog_warning();
                tracing::warn!(used_bytes, cap_bytes, "memory usage above warning threshold");
            }
            _ => {}
        }
        last_level = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_buckets_by_threshold() {
        assert_eq!(classify(100, 1000), WatchdogLevel::Nominal);
        assert_eq!(classify(850, 1000), WatchdogLevel::Warning);
        assert_eq!(classify(950, 1000), WatchdogLevel::Critical);
    }

    #[test]
    fn classify_treats_zero_cap_as_nominal() {
        assert_eq!(classify(1_000_000, 0), WatchdogLevel::Nominal);
    }
}
