//! Domain model for the media catalog
//!
//! One `AudioRecord` per observed file, with validation and the disk-state
//! refresh logic the reconciler applies on every pass.

use bridge_traits::disk::DiskEntry;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The reserved order value marking the sticky (pinned-to-front) record.
pub const STICKY_ORDER: i64 = 0;

/// A persisted catalog entry representing a single media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AudioRecord {
    /// Absolute path/URI. Primary key; no two records share a URL.
    pub url: String,
    /// Display title derived from the file name. Re-derivable.
    pub title: String,
    /// Position in the active ordering. Not required to be contiguous;
    /// [`STICKY_ORDER`] is reserved for the pinned record.
    pub play_order: i64,
    /// Byte length, unknown while the file is a cloud placeholder.
    pub size: Option<i64>,
    /// Content type reported by the watcher, if any.
    pub content_type: Option<String>,
    /// Folders are cataloged but excluded from navigation.
    pub is_folder: bool,
    /// SHA-256 of the file contents, hex-encoded. Only set for records
    /// whose file is confirmed fully present on disk.
    pub file_hash: Option<String>,
    /// URL of the canonical record this one duplicates, if any. The
    /// canonical record always has a strictly earlier `(play_order, url)`.
    pub duplicated_of: Option<String>,
    /// User "liked" flag.
    pub liked: bool,
    /// Monotonic play counter.
    pub play_count: i64,
    /// Whether the file is currently a cloud placeholder.
    pub is_placeholder: bool,
    /// Download progress in `0.0..=1.0`, refreshed from the watcher.
    pub download_progress: f64,
    /// Whether the file carries embedded cover art.
    pub has_cover: bool,
    /// Unix seconds when the record was first created.
    pub created_at: i64,
    /// Unix seconds of the last mutation.
    pub updated_at: i64,
}

impl AudioRecord {
    /// Build a fresh record from a disk entry.
    ///
    /// The hash starts unset; the dedup job fills it in once the file is
    /// fully local.
    pub fn from_disk_entry(entry: &DiskEntry, play_order: i64, now: i64) -> Self {
        Self {
            url: entry.url.clone(),
            title: title_from_url(&entry.url),
            play_order,
            size: entry.size.map(|s| s as i64),
            content_type: entry.content_type.clone(),
            is_folder: entry.is_folder,
            file_hash: None,
            duplicated_of: None,
            liked: false,
            play_count: 0,
            is_placeholder: entry.is_placeholder,
            download_progress: entry.download_progress,
            has_cover: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh mutable disk state from a snapshot entry.
    ///
    /// Returns `true` when anything changed, so an unchanged record costs
    /// no store write. A record observed as placeholder again, or whose
    /// size no longer matches, loses its hash; a stale hash must never
    /// survive on a file that is not confirmed fully present.
    pub fn apply_disk_state(&mut self, entry: &DiskEntry, now: i64) -> bool {
        let mut changed = false;

        let size = entry.size.map(|s| s as i64);
        if self.size != size {
            if self.file_hash.is_some() {
                self.file_hash = None;
                self.duplicated_of = None;
            }
            self.size = size;
            changed = true;
        }

        if self.is_placeholder != entry.is_placeholder {
            if entry.is_placeholder && self.file_hash.is_some() {
                self.file_hash = None;
                self.duplicated_of = None;
            }
            self.is_placeholder = entry.is_placeholder;
            changed = true;
        }

        if (self.download_progress - entry.download_progress).abs() > f64::EPSILON {
            self.download_progress = entry.download_progress;
            changed = true;
        }

        if entry.content_type.is_some() && self.content_type != entry.content_type {
            self.content_type = entry.content_type.clone();
            changed = true;
        }

        let title = title_from_url(&entry.url);
        if self.title != title {
            self.title = title;
            changed = true;
        }

        if changed {
            self.updated_at = now;
        }

        changed
    }

    /// Whether the underlying file is confirmed fully present on disk.
    pub fn is_downloaded(&self) -> bool {
        !self.is_placeholder
    }

    /// Whether this record qualifies for content hashing: fully
    /// downloaded, non-empty, not a folder, hash not yet computed.
    pub fn needs_hash(&self) -> bool {
        self.file_hash.is_none()
            && self.is_downloaded()
            && !self.is_folder
            && self.size.unwrap_or(0) > 0
    }

    /// Validate record data
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("Record URL cannot be empty".to_string());
        }

        if self.title.trim().is_empty() {
            return Err("Record title cannot be empty".to_string());
        }

        if !(0.0..=1.0).contains(&self.download_progress) {
            return Err(format!(
                "Download progress {} is out of range",
                self.download_progress
            ));
        }

        if self.play_count < 0 {
            return Err("Play count cannot be negative".to_string());
        }

        if self.duplicated_of.as_deref() == Some(self.url.as_str()) {
            return Err("Record cannot be a duplicate of itself".to_string());
        }

        if let Some(hash) = &self.file_hash {
            if hash.is_empty() {
                return Err("File hash, when set, cannot be empty".to_string());
            }
        }

        Ok(())
    }
}

/// Derive a display title from a URL: the file name without its final
/// extension, with the URL itself as fallback for odd paths.
pub fn title_from_url(url: &str) -> String {
    let name = url.rsplit('/').next().unwrap_or(url);
    let title = match name.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => name,
    };
    if title.is_empty() {
        url.to_string()
    } else {
        title.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, size: u64) -> DiskEntry {
        DiskEntry::file(url, size)
    }

    #[test]
    fn test_title_from_url() {
        assert_eq!(title_from_url("/library/My Book.m4b"), "My Book");
        assert_eq!(title_from_url("/library/noext"), "noext");
        assert_eq!(title_from_url("/library/.hidden"), ".hidden");
        assert_eq!(title_from_url("archive.tar.gz"), "archive.tar");
    }

    #[test]
    fn test_from_disk_entry() {
        let record = AudioRecord::from_disk_entry(&entry("/library/a.mp3", 42), 1234, 1_700_000_000);
        assert_eq!(record.url, "/library/a.mp3");
        assert_eq!(record.title, "a");
        assert_eq!(record.play_order, 1234);
        assert_eq!(record.size, Some(42));
        assert!(record.file_hash.is_none());
        assert!(!record.liked);
    }

    #[test]
    fn test_apply_disk_state_no_change_is_noop() {
        let e = entry("/library/a.mp3", 42);
        let mut record = AudioRecord::from_disk_entry(&e, 1, 100);
        assert!(!record.apply_disk_state(&e, 200));
        assert_eq!(record.updated_at, 100);
    }

    #[test]
    fn test_apply_disk_state_placeholder_clears_hash() {
        let mut record = AudioRecord::from_disk_entry(&entry("/library/a.mp3", 42), 1, 100);
        record.file_hash = Some("abc".to_string());
        record.duplicated_of = Some("/library/b.mp3".to_string());

        let placeholder = DiskEntry::placeholder("/library/a.mp3", Some(42));
        assert!(record.apply_disk_state(&placeholder, 200));
        assert!(record.is_placeholder);
        assert!(record.file_hash.is_none());
        assert!(record.duplicated_of.is_none());
        assert_eq!(record.updated_at, 200);
    }

    #[test]
    fn test_apply_disk_state_size_change_clears_hash() {
        let mut record = AudioRecord::from_disk_entry(&entry("/library/a.mp3", 42), 1, 100);
        record.file_hash = Some("abc".to_string());

        assert!(record.apply_disk_state(&entry("/library/a.mp3", 43), 200));
        assert_eq!(record.size, Some(43));
        assert!(record.file_hash.is_none());
    }

    #[test]
    fn test_needs_hash() {
        let mut record = AudioRecord::from_disk_entry(&entry("/library/a.mp3", 42), 1, 100);
        assert!(record.needs_hash());

        record.file_hash = Some("abc".to_string());
        assert!(!record.needs_hash());

        record.file_hash = None;
        record.is_placeholder = true;
        assert!(!record.needs_hash());

        record.is_placeholder = false;
        record.size = Some(0);
        assert!(!record.needs_hash());
    }

    #[test]
    fn test_validation() {
        let mut record = AudioRecord::from_disk_entry(&entry("/library/a.mp3", 42), 1, 100);
        assert!(record.validate().is_ok());

        record.duplicated_of = Some(record.url.clone());
        assert!(record.validate().is_err());

        record.duplicated_of = None;
        record.download_progress = 1.5;
        assert!(record.validate().is_err());

        record.download_progress = 1.0;
        record.play_count = -1;
        assert!(record.validate().is_err());
    }
}
