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
#![allow(clippy::module_name_repetitions)]
#![allow(unexpected_cfgs)]

//! Shared event bus for the Clipforge import pipeline.
//!
//! Every state transition a job goes through — lease, progress tick, egress
//! attempt, terminal success or failure — is published here as a typed
//! [`Event`]. The bus keeps a bounded in-memory replay ring so a late
//! subscriber (an external poller reconnecting with a last-seen id, or the
//! recovery mirror catching up after a crash) can ask for everything newer
//! than an id it already saw, instead of missing events emitted between
//! subscribe calls.

/// Error type produced by bus operations.
pub mod error;
/// Event payload and envelope definitions.
pub mod payloads;
/// Bus construction, publish, and subscribe plumbing.
pub mod routing;
/// Event kind discriminators for transport layers (SSE, logs).
pub mod topics;

pub use error::{EventBusError, EventBusResult};
pub use payloads::{Event, EventEnvelope, EventId, ImportStage, JobLifecycleState};
pub use routing::{EventBus, EventStream};
pub use topics::event_kind;
