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

//! Shared job, progress, and error contract types for the Clipforge import pipeline.
//!
//! This crate has no knowledge of Postgres, HTTP, or child processes — it
//! defines the domain model (`model`) and the async trait seams (`service`)
//! that the store, fetch, origin, and net crates implement against, plus the
//! error taxonomy (`error`) and retry policy (`retry`) every one of them shares.

/// Error taxonomy and retry classification.
pub mod error;
/// Core domain types: jobs, progress, recovery records, egress identities.
pub mod model;
/// Backoff delay computation shared by the job store and fetchers.
pub mod retry;
/// Async trait contracts implemented by the store, fetch, origin, and net crates.
pub mod service;

pub use error::{ClipforgeError, ClipforgeResult, ErrorKind, classify_child_stderr};
pub use model::{
    CancellationToken, EgressAttempt, EgressIdentity, ImportStage, Job, JobCompletion, JobSpec,
    JobStatus, Progress, RecoveryState, SelectedQuality, SourceKind, sort_identities,
};
pub use retry::RetryPolicy;
pub use service::{
    CatalogClient, EgressPool, Existence, FetchOutcome, JobStore, OriginUploader, ProgressSink,
    Recovery, SourceFetcher, UploadOutcome,
};
