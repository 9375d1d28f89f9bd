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

//! Postgres-backed job store, FIFO dispatcher, and crash-recovery mirror.

/// Durable job queue and state machine (spec component C1).
pub mod store;
/// Heartbeat-backed recovery mirror (spec component C5.1/C5.2).
pub mod recovery;

pub use recovery::PgRecoveryMirror;
pub use store::PgJobStore;
