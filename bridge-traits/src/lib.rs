//! # Host Bridge Traits
//!
//! Collaborator contracts the catalog core consumes but does not implement.
//!
//! ## Overview
//!
//! This crate defines the boundary between the catalog engine and the host
//! application. Each trait represents a capability the core requires but
//! that is provided differently per host (local folder, iCloud-backed
//! folder, test fixtures):
//!
//! - [`DiskWatcher`](disk::DiskWatcher) - directory snapshots, download
//!   requests, and file deletion for the watched library folder
//! - [`FileAccess`](disk::FileAccess) - existence checks and streaming
//!   reads used by content hashing
//! - [`MetadataReader`](metadata::MetadataReader) - optional cover-art
//!   probing
//! - [`Clock`](time::Clock) - time source for deterministic testing
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so implementations can be
//! shared across async tasks behind `Arc<dyn Trait>`.
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Host
//! implementations should convert platform errors into it with enough
//! context (paths, progress state) to act on.

pub mod disk;
pub mod error;
pub mod metadata;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use disk::{DiskEntry, DiskSnapshot, DiskWatcher, FileAccess, FileMetadata, WatcherEvent};
pub use metadata::MetadataReader;
pub use time::{Clock, SystemClock};
