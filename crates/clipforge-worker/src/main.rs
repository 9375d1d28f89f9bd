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

//! Binary entrypoint that wires the worker pool together and blocks until
//! shutdown.

use clipforge_worker::bootstrap;

/// Bootstraps the worker pool and blocks until shutdown.
///
/// Exits `0` on a clean shutdown, `1` if bootstrap or the run loop itself
/// fails (missing configuration, database unreachable at start, and so on).
#[tokio::main]
async fn main() {
    if let Err(err) = bootstrap::run_app().await {
        eprintln!("clipforge-worker: {err}");
        std::process::exit(1);
    }
}
