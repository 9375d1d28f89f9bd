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

//! Egress identity pool and catalog webhook client (spec components C5.4/C5.6).

/// Admin-API-backed egress identity pool with a hardcoded fallback list.
pub mod egress;
/// HTTP client for the external video catalog's webhook protocol.
pub mod catalog;

pub use catalog::HttpCatalogClient;
pub use egress::{AdminEgressPool, HARDCODED_FALLBACK_IDENTITIES};
