#![cfg_attr(not(test), forbid(unsafe_code))]
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

//! Flat, environment-variable-backed configuration object for the import
//! pipeline (spec component ambient stack).
//!
//! Unlike a dashboard-editable settings service, this configuration is
//! loaded once at process start and never changes for the lifetime of the
//! process; a new deploy is the only way to pick up a changed value.

/// Error types for configuration loading.
pub mod error;
/// Environment-variable parsing.
pub mod loader;
/// Typed configuration model.
pub mod model;

pub use error::{ConfigError, ConfigResult};
pub use loader::load_from_env;
pub use model::{AdminEndpoint, ClipforgeConfig, CloudDriveCredentials, DownloaderSettings};
