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
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::multiple_crate_versions)]

//! Administrative CLI for inspecting and operating a Clipforge job store.
//!
//! Layout: `context.rs` (connection setup and the CLI-level error type),
//! `output.rs` (table/JSON rendering), and `cli.rs` (argument parsing and
//! command dispatch) with a thin `main.rs` that delegates to `run()`.

/// Argument parsing, command dispatch, and the `Cli` definition.
pub mod cli;
/// Database connection setup and the CLI-level error type.
pub mod context;
/// Table/JSON rendering helpers.
pub mod output;

pub use cli::run;
