#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(unexpected_cfgs)]
#![allow(clippy::multiple_crate_versions)]

//! Telemetry primitives shared across the Clipforge import pipeline.
//!
//! Layout: `init.rs` (logging setup), `metrics.rs` (Prometheus registry),
//! `watchdog.rs` (memory sampling loop).

pub mod error;
pub mod init;
pub mod metrics;
pub mod watchdog;

pub use error::{Result as TelemetryResult, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging, log_format_from_config};
pub use metrics::{Metrics, MetricsSnapshot};
pub use watchdog::{
    CRITICAL_THRESHOLD, DEFAULT_SAMPLE_INTERVAL, WARNING_THRESHOLD, WatchdogLevel, classify, run,
};
