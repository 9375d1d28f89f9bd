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

//! Source fetchers for the four supported source kinds (spec component C3).

/// Cloud-drive share-link fetcher.
pub mod cloud_drive;
/// Direct-URL streaming fetcher.
pub mod direct_url;
/// Local-passthrough fetcher for pre-staged uploads.
pub mod local;
/// External-downloader-binary platform-id fetcher.
pub mod platform_id;
mod tempdest;

pub use cloud_drive::{CloudDriveConfig, CloudDriveFetcher};
pub use direct_url::DirectUrlFetcher;
pub use local::LocalPassthroughFetcher;
pub use platform_id::{PlatformIdConfig, PlatformIdFetcher};
pub use tempdest::nonce_path;
