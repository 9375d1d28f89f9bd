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
#![allow(clippy::multiple_crate_versions)]

//! Worker pool binary: dispatches jobs, drives source fetchers and the
//! origin uploader, and supervises recovery.
//!
//! Layout: `bootstrap.rs` (service wiring and the worker-loop supervisor),
//! `dispatch.rs` (source-kind to fetcher routing), `pipeline.rs` (per-job
//! fetch/upload/notify/cleanup), `recovery_sweep.rs` (startup stall
//! recovery), `error.rs` (application-level error type).

/// Application bootstrap, worker-loop supervision, and graceful shutdown.
pub mod bootstrap;
/// Source-kind to fetcher routing.
pub mod dispatch;
/// Application-level error type.
pub mod error;
/// Per-job fetch/upload/notify/cleanup processing.
pub mod pipeline;
/// Startup stall-recovery sweep.
pub mod recovery_sweep;

pub use bootstrap::run_app;
