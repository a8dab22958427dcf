//! Watched-Directory and File Access Abstractions
//!
//! Provides the contracts through which the catalog core observes and
//! manipulates the library directory. The directory is typically backed by
//! a cloud-synced folder, so files may exist as placeholders that are only
//! materialized on demand.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::error::Result;

/// One file or folder observed in the watched directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskEntry {
    /// Absolute path/URI of the entry. Stable identity for catalog records.
    pub url: String,
    /// Byte length, if known. Placeholders may not report a size.
    pub size: Option<u64>,
    /// Whether the entry is a cloud placeholder not yet fully downloaded.
    pub is_placeholder: bool,
    /// Download progress in `0.0..=1.0`. `1.0` once fully local.
    pub download_progress: f64,
    /// Set on incremental snapshots when the entry was removed from disk.
    pub is_deleted: bool,
    /// Whether the entry is a directory.
    pub is_folder: bool,
    /// MIME-ish content type reported by the host, if any.
    pub content_type: Option<String>,
}

impl DiskEntry {
    /// A fully-downloaded regular file.
    pub fn file(url: impl Into<String>, size: u64) -> Self {
        Self {
            url: url.into(),
            size: Some(size),
            is_placeholder: false,
            download_progress: 1.0,
            is_deleted: false,
            is_folder: false,
            content_type: None,
        }
    }

    /// A cloud placeholder with known size but no local bytes yet.
    pub fn placeholder(url: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            url: url.into(),
            size,
            is_placeholder: true,
            download_progress: 0.0,
            is_deleted: false,
            is_folder: false,
            content_type: None,
        }
    }

    /// A deletion marker for incremental snapshots.
    pub fn deleted(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            size: None,
            is_placeholder: false,
            download_progress: 0.0,
            is_deleted: true,
            is_folder: false,
            content_type: None,
        }
    }

    /// Mark this entry as a folder.
    pub fn folder(mut self) -> Self {
        self.is_folder = true;
        self
    }

    /// Attach a content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A point-in-time listing of the watched directory.
///
/// Full-load snapshots describe the complete directory; incremental
/// snapshots carry only the entries that changed (including deletion
/// markers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSnapshot {
    pub entries: Vec<DiskEntry>,
    pub is_full_load: bool,
}

impl DiskSnapshot {
    pub fn full(entries: Vec<DiskEntry>) -> Self {
        Self {
            entries,
            is_full_load: true,
        }
    }

    pub fn incremental(entries: Vec<DiskEntry>) -> Self {
        Self {
            entries,
            is_full_load: false,
        }
    }
}

/// Events pushed by a [`DiskWatcher`] subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WatcherEvent {
    /// A new directory snapshot is available.
    Snapshot(DiskSnapshot),
    /// Download progress changed for a single file.
    DownloadProgress {
        url: String,
        /// Progress percentage, 0-100.
        percent: u8,
    },
}

/// Watched-directory bridge.
///
/// The host observes the library directory (filesystem events, cloud sync
/// state) and pushes [`WatcherEvent`]s into the channel returned by
/// [`watch`](DiskWatcher::watch). The core never touches the directory
/// structure directly; downloads and deletions go back through this trait.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::disk::{DiskWatcher, WatcherEvent};
///
/// async fn run(watcher: &dyn DiskWatcher) -> bridge_traits::error::Result<()> {
///     let mut events = watcher.watch(std::path::Path::new("/library")).await?;
///     while let Some(event) = events.recv().await {
///         match event {
///             WatcherEvent::Snapshot(snapshot) => { /* reconcile */ }
///             WatcherEvent::DownloadProgress { url, percent } => { /* surface */ }
///         }
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait DiskWatcher: Send + Sync {
    /// Start observing a directory.
    ///
    /// The first event on the returned channel must be a full-load
    /// snapshot; subsequent events may be full or incremental. The channel
    /// closes when the host stops watching.
    async fn watch(&self, directory: &Path) -> Result<mpsc::Receiver<WatcherEvent>>;

    /// Request materialization of a placeholder file.
    ///
    /// Progress is reported through `DownloadProgress` events on the watch
    /// channel, not through this future; the future resolves once the
    /// request was accepted by the host.
    async fn download(&self, url: &str) -> Result<()>;

    /// Delete a file from the watched directory.
    async fn delete(&self, url: &str) -> Result<()>;
}

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// Read-side file access bridge.
///
/// Used by content hashing to stream file bytes without loading whole
/// files into memory, and by duplicate linking to re-validate that a file
/// is still present before a reference to it is persisted.
#[async_trait]
pub trait FileAccess: Send + Sync {
    /// Check if a file or directory exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory.
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Read entire file contents into memory.
    ///
    /// For large files, prefer [`open_read_stream`](FileAccess::open_read_stream).
    async fn read_file(&self, path: &Path) -> Result<bytes::Bytes>;

    /// Open a file for streaming reads.
    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>>;

    /// List all entries in a directory.
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;
}
