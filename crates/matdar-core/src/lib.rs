//! # Matdar Core Library
//!
//! This crate provides the reconciliation, indexing and query engine behind
//! the Matdar offline voter roll. It is platform- and network-agnostic:
//! the cache, the remote store, the bundled snapshot and the reachability
//! probe are all traits.
//!
//! ## Architecture
//!
//! - **Types** (`types`): Records, datasets, provenance and sync state
//! - **Ingest** (`ingest`): Lenient decoding of ingestion-service exports
//! - **Normalize / Translit** (`normalize`, `translit`): Text rules shared by
//!   the indexer and the query side
//! - **Index** (`index`): Per-record search surfaces
//! - **Search** (`search`): Conjunctive queries, filters and pagination
//! - **Store / Persistence** (`store`, `persistence`): Local cache
//! - **Reconcile** (`reconcile`): Choosing and refreshing the canonical set
//! - **Registry** (`registry`): Caller-facing facade with atomic publish
//! - **Tasks / Debounce** (`tasks`, `debounce`): Background work
//! - **Labels** (`labels`): Owned cache of translated UI labels
//! - **Config** (`config`): Configuration management
//!
//! ## Example
//!
//! ```rust,ignore
//! use matdar_core::{FileCacheStore, Query, Registry};
//! use std::sync::Arc;
//!
//! let registry = Registry::builder(Arc::new(FileCacheStore::new("./data")))
//!     .remote(remote)
//!     .open();
//!
//! if registry.availability() {
//!     let page = registry.search(&Query::text("राम").with_booths(["5"]));
//!     for record in &page.records {
//!         println!("{} {}", record.id, record.name);
//!     }
//! }
//! ```

pub mod config;
pub mod debounce;
pub mod error;
pub mod index;
pub mod ingest;
pub mod labels;
pub mod normalize;
pub mod persistence;
pub mod reconcile;
pub mod registry;
pub mod search;
pub mod source;
pub mod store;
pub mod tasks;
pub mod translit;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use debounce::{DebouncedSearch, Debouncer};
pub use error::{ErrorKind, MatdarError, Result};
pub use index::{build_index, IndexStats, IndexedRecord, SearchIndex};
pub use ingest::{decode_batch, ImportReport, RawRecord};
pub use labels::{LabelCache, Translator};
pub use persistence::DatasetCache;
pub use reconcile::{ChangeDetector, Reconciler, RefreshOutcome};
pub use registry::{Registry, SubscriptionId};
pub use search::{execute, FieldMatcher, Query, QueryPage};
pub use source::{
    ChannelListener, Connectivity, DatasetEvent, DatasetListener, ManualConnectivity,
    RemoteStore, SnapshotSource, StaticSnapshot, TaskHandle,
};
pub use store::{CacheStore, FileCacheStore, MemoryCacheStore};
pub use tasks::{ConnectivityMonitor, SyncScheduler};
pub use types::{
    CanonicalDataset, Provenance, Record, RecordId, SurveyRecord, SyncPhase, SyncState,
};
