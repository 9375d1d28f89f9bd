//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters/gauges the worker pool and recovery sweep need.

use std::convert::TryFrom;
use std::time::Duration;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across the worker pool.
#[derive(Clone)]
pub struct Metrics {
    inner: std::sync::Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    jobs_submitted_total: IntCounter,
    jobs_completed_total: IntCounter,
    jobs_failed_total: IntCounterVec,
    egress_attempts_total: IntCounterVec,
    recovery_sweeps_total: IntCounter,
    recovery_stalled_jobs_total: IntCounter,
    active_workers: IntGauge,
    queue_depth: IntGauge,
    memory_bytes: IntGauge,
    memory_watchdog_warnings_total: IntCounter,
    memory_watchdog_critical_total: IntCounter,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total jobs submitted since process start.
    pub jobs_submitted_total: u64,
    /// Total jobs that reached a terminal `completed` state.
    pub jobs_completed_total: u64,
    /// Number of workers currently leasing a job.
    pub active_workers: i64,
    /// Current queue depth as last observed by the dispatcher.
    pub queue_depth: i64,
    /// Most recently sampled process memory usage, in bytes.
    pub memory_bytes: i64,
    /// Total recovery sweeps executed since process start.
    pub recovery_sweeps_total: u64,
    /// Total stalled jobs reclaimed by recovery sweeps.
    pub recovery_stalled_jobs_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built
    /// or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let jobs_submitted_total = IntCounter::with_opts(Opts::new(
            "jobs_submitted_total",
            "Total import jobs submitted",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "jobs_submitted_total",
            source,
        })?;
        let jobs_completed_total = IntCounter::with_opts(Opts::new(
            "jobs_completed_total",
            "Total import jobs that completed successfully",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "jobs_completed_total",
            source,
        })?;
        let jobs_failed_total = IntCounterVec::new(
            Opts::new("jobs_failed_total", "Total import jobs that failed, by kind"),
            &["kind"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "jobs_failed_total",
            source,
        })?;
        let egress_attempts_total = IntCounterVec::new(
            Opts::new(
                "egress_attempts_total",
                "Platform-id egress identity attempts, by outcome",
            ),
            &["outcome"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "egress_attempts_total",
            source,
        })?;
        let recovery_sweeps_total = IntCounter::with_opts(Opts::new(
            "recovery_sweeps_total",
            "Total stall-recovery sweeps executed",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "recovery_sweeps_total",
            source,
        })?;
        let recovery_stalled_jobs_total = IntCounter::with_opts(Opts::new(
            "recovery_stalled_jobs_total",
            "Total stalled jobs reclaimed by recovery sweeps",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "recovery_stalled_jobs_total",
            source,
        })?;
        let active_workers = IntGauge::with_opts(Opts::new(
            "active_workers",
            "Number of workers currently leasing a job",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "active_workers",
            source,
        })?;
        let queue_depth = IntGauge::with_opts(Opts::new("queue_depth", "Queued import jobs"))
            .map_err(|source| TelemetryError::MetricsCollector {
                name: "queue_depth",
                source,
            })?;
        let memory_bytes = IntGauge::with_opts(Opts::new(
            "memory_bytes",
            "Most recently sampled process memory usage in bytes",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "memory_bytes",
            source,
        })?;
        let memory_watchdog_warnings_total = IntCounter::with_opts(Opts::new(
            "memory_watchdog_warnings_total",
            "Total times the memory watchdog crossed the warning threshold",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "memory_watchdog_warnings_total",
            source,
        })?;
        let memory_watchdog_critical_total = IntCounter::with_opts(Opts::new(
            "memory_watchdog_critical_total",
            "Total times the memory watchdog crossed the critical threshold",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "memory_watchdog_critical_total",
            source,
        })?;

        macro_rules! register {
            ($collector:expr, $name:literal) => {
                registry
                    .register(Box::new($collector.clone()))
                    .map_err(|source| TelemetryError::MetricsRegister {
                        name: $name,
                        source,
                    })?;
            };
        }
        register!(jobs_submitted_total, "jobs_submitted_total");
        register!(jobs_completed_total, "jobs_completed_total");
        register!(jobs_failed_total, "jobs_failed_total");
        register!(egress_attempts_total, "egress_attempts_total");
        register!(recovery_sweeps_total, "recovery_sweeps_total");
        register!(recovery_stalled_jobs_total, "recovery_stalled_jobs_total");
        register!(active_workers, "active_workers");
        register!(queue_depth, "queue_depth");
        register!(memory_bytes, "memory_bytes");
        register!(
            memory_watchdog_warnings_total,
            "memory_watchdog_warnings_total"
        );
        register!(
            memory_watchdog_critical_total,
            "memory_watchdog_critical_total"
        );

        Ok(Self {
            inner: std::sync::Arc::new(MetricsInner {
                registry,
                jobs_submitted_total,
                jobs_completed_total,
                jobs_failed_total,
                egress_attempts_total,
                recovery_sweeps_total,
                recovery_stalled_jobs_total,
                active_workers,
                queue_depth,
                memory_bytes,
                memory_watchdog_warnings_total,
                memory_watchdog_critical_total,
            }),
        })
    }

    /// Increment the submitted-job counter.
    pub fn inc_jobs_submitted(&self) {
        self.inner.jobs_submitted_total.inc();
    }

    /// Increment the completed-job counter.
    pub fn inc_jobs_completed(&self) {
        self.inner.jobs_completed_total.inc();
    }

    /// Increment the failed-job counter for the given error kind.
    pub fn inc_jobs_failed(&self, kind: &str) {
        self.inner
            .jobs_failed_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Increment the egress-attempt counter for the given outcome (`success`/`failure`).
    pub fn inc_egress_attempt(&self, outcome: &str) {
        self.inner
            .egress_attempts_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Increment the recovery-sweep counter.
    pub fn inc_recovery_sweep(&self) {
        self.inner.recovery_sweeps_total.inc();
    }

    /// Increment the stalled-jobs-reclaimed counter by the given amount.
    pub fn inc_recovery_stalled_jobs(&self, count: u64) {
        self.inner.recovery_stalled_jobs_total.inc_by(count);
    }

    /// Set the active-worker gauge.
    pub fn set_active_workers(&self, count: i64) {
        self.inner.active_workers.set(count);
    }

    /// Set the queue-depth gauge.
    pub fn set_queue_depth(&self, depth: i64) {
        self.inner.queue_depth.set(depth);
    }

    /// Set the most recently sampled memory usage, in bytes.
    pub fn set_memory_bytes(&self, bytes: i64) {
        self.inner.memory_bytes.set(bytes);
    }

    /// Increment the memory-watchdog warning counter.
    pub fn inc_memory_watchdog_warning(&self) {
        self.inner.memory_watchdog_warnings_total.inc();
    }

    /// Increment the memory-watchdog critical counter.
    pub fn inc_memory_watchdog_critical(&self) {
        self.inner.memory_watchdog_critical_total.inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted_total: self.inner.jobs_submitted_total.get(),
            jobs_completed_total: self.inner.jobs_completed_total.get(),
            active_workers: self.inner.active_workers.get(),
            queue_depth: self.inner.queue_depth.get(),
            memory_bytes: self.inner.memory_bytes.get(),
            recovery_sweeps_total: self.inner.recovery_sweeps_total.get(),
            recovery_stalled_jobs_total: self.inner.recovery_stalled_jobs_total.get(),
        }
    }

    /// Convert a duration to milliseconds saturating at `i64::MAX`.
    pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_to_ms_saturates_on_large_values() {
        let duration = Duration::from_secs(u64::MAX / 2);
        assert_eq!(Metrics::duration_to_ms(duration), i64::MAX);
    }

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_jobs_submitted();
        metrics.inc_jobs_completed();
        metrics.inc_jobs_failed("source-denied");
        metrics.inc_egress_attempt("success");
        metrics.inc_recovery_sweep();
        metrics.inc_recovery_stalled_jobs(2);
        metrics.set_active_workers(4);
        metrics.set_queue_depth(7);
        metrics.set_memory_bytes(1_048_576);
        metrics.inc_memory_watchdog_warning();
        metrics.inc_memory_watchdog_critical();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_submitted_total, 1);
        assert_eq!(snapshot.jobs_completed_total, 1);
        assert_eq!(snapshot.active_workers, 4);
        assert_eq!(snapshot.queue_depth, 7);
        assert_eq!(snapshot.memory_bytes, 1_048_576);
        assert_eq!(snapshot.recovery_sweeps_total, 1);
        assert_eq!(snapshot.recovery_stalled_jobs_total, 2);

        let rendered = metrics.render()?;
        assert!(rendered.contains("jobs_submitted_total"));
        assert!(rendered.contains("egress_attempts_total"));
        assert!(rendered.contains("memory_watchdog_critical_total"));
        Ok(())
    }
}
