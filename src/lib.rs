//! Rolodex: contact reconciliation and caching engine.
//!
//! Ingests interaction history from an email source and a calendar source,
//! collapses email threads, merges both sources into one deduplicated
//! contact list, enriches it with avatars, applies durable user edits, and
//! serves the result through a staleness-aware session cache with
//! foreground and background refresh paths.

pub mod cache;
pub mod config;
pub mod error;
pub mod merge;
pub mod overlay;
pub mod photos;
pub mod pipeline;
pub mod sources;
pub mod sync;
pub mod threads;
pub mod types;

pub use cache::{CacheStore, FileCacheStore, MemoryCacheStore};
pub use config::SyncConfig;
pub use error::{EngineError, SourceError};
pub use overlay::{FileOverlayStore, OverlayStore};
pub use photos::PhotoDirectory;
pub use pipeline::{FetchPhase, Pipeline};
pub use sources::RecordSource;
pub use sync::{RefreshOutcome, SyncOrchestrator};
pub use types::{CacheEntry, Contact, ContactEdit, InteractionRecord, SourceKind};
