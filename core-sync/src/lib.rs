//! # Catalog Sync & Ordering Module
//!
//! Keeps the persisted catalog consistent with an unreliable,
//! asynchronously-changing disk and answers the ordering/navigation
//! queries that drive continuous playback.
//!
//! ## Components
//!
//! - **Sync Engine** (`reconciler`): diffs disk snapshots against the
//!   catalog with a hash-map diff, full or incremental
//! - **Dedup Engine** (`dedup`): content hashing with bounded concurrency
//!   and canonical duplicate linking
//! - **Ordering Service** (`ordering`): sequential and random orderings
//!   plus the sticky (pinned-to-front) swap
//! - **Navigation Service** (`navigation`): next/previous/first queries
//!   with wraparound
//! - **Job Registry** (`scheduler`): de-duplicated, cooperatively
//!   cancellable background jobs with rate-limited progress logging
//! - **Prefetch Service** (`prefetch`): downloads N records ahead of the
//!   playback cursor
//! - **Library Coordinator** (`coordinator`): wires watcher events to the
//!   serialized maintenance worker and exposes the public API

pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod navigation;
pub mod ordering;
pub mod prefetch;
pub mod reconciler;
pub mod scheduler;

pub use coordinator::LibraryCoordinator;
pub use dedup::{DedupEngine, DedupStats};
pub use error::{Result, SyncError};
pub use navigation::NavigationService;
pub use ordering::{OrderingService, SortMode};
pub use prefetch::PrefetchService;
pub use reconciler::{ReconcileStats, SyncEngine};
pub use scheduler::{JobGuard, JobId, JobRegistry, JobState};
