//! # Duplicate Detection
//!
//! Two-phase background job over the catalog.
//!
//! **Phase 1 (hashing).** Every record with an unset hash whose file is
//! confirmed fully downloaded gets a streaming SHA-256 digest. Hashing is
//! fanned out through a semaphore-bounded task set so only a few files are
//! open at once; unbounded parallel hashing of large files grows memory
//! without limit. Each hash is persisted the moment it is computed, so
//! progress survives partial failures and cancellation.
//!
//! **Phase 2 (linking).** Records sharing a hash are linked to their
//! canonical copy: the one with the smallest `(play_order, url)`. A link
//! is only written after re-validating that the canonical file still
//! exists on disk, and the computed value (link or none) replaces whatever
//! was stored, which clears stale links in the same write. The phase is a
//! pure function of `{url, play_order, file_hash, existence}`; re-running
//! it on an unchanged catalog changes nothing.
//!
//! Cancellation is checked between records; every persisted write is a
//! complete, valid state.

use bridge_traits::disk::FileAccess;
use core_catalog::repositories::AudioRecordRepository;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::scheduler::JobGuard;

/// Read buffer size for streaming hashes.
const HASH_CHUNK_BYTES: usize = 64 * 1024;

/// Outcome of a dedup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DedupStats {
    /// Hashes computed and persisted.
    pub hashed: u64,
    /// Records whose file could not be read; retried on the next run.
    pub hash_failures: u64,
    /// Duplicate links written.
    pub linked: u64,
    /// Stale links cleared.
    pub cleared: u64,
    /// Whether the pass stopped at a cancellation checkpoint.
    pub cancelled: bool,
}

/// Computes content hashes and links duplicate records.
pub struct DedupEngine {
    records: Arc<dyn AudioRecordRepository>,
    fs: Arc<dyn FileAccess>,
    events: EventBus,
    hash_concurrency: usize,
}

impl DedupEngine {
    /// Create a new dedup engine.
    ///
    /// # Arguments
    ///
    /// * `hash_concurrency` - Maximum number of files hashed at once
    pub fn new(
        records: Arc<dyn AudioRecordRepository>,
        fs: Arc<dyn FileAccess>,
        events: EventBus,
        hash_concurrency: usize,
    ) -> Self {
        Self {
            records,
            fs,
            events,
            hash_concurrency: hash_concurrency.max(1),
        }
    }

    /// Run both phases.
    ///
    /// Emits `Library(Updated)` when any hash or link changed. A cancelled
    /// pass returns the partial stats with `cancelled` set; it is not an
    /// error.
    #[instrument(skip_all)]
    pub async fn compute_duplicates(&self, guard: &JobGuard) -> Result<DedupStats> {
        let mut stats = DedupStats::default();

        self.hash_pending(guard, &mut stats).await?;
        if !stats.cancelled {
            self.link_duplicates(guard, &mut stats).await?;
        }

        if stats.hashed > 0 || stats.linked > 0 || stats.cleared > 0 {
            self.events
                .emit(CoreEvent::Library(LibraryEvent::Updated))
                .ok();
        }

        info!(
            hashed = stats.hashed,
            failures = stats.hash_failures,
            linked = stats.linked,
            cleared = stats.cleared,
            cancelled = stats.cancelled,
            "Dedup pass finished"
        );

        Ok(stats)
    }

    /// Phase 1: hash every eligible record, bounded concurrency.
    async fn hash_pending(&self, guard: &JobGuard, stats: &mut DedupStats) -> Result<()> {
        let pending = self.records.records_needing_hash().await?;
        if pending.is_empty() {
            return Ok(());
        }

        let total = pending.len() as u64;
        info!(total, "Hashing pending records");

        let semaphore = Arc::new(Semaphore::new(self.hash_concurrency));
        let mut tasks: JoinSet<(String, bridge_traits::error::Result<String>)> = JoinSet::new();

        for record in pending {
            if guard.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let fs = Arc::clone(&self.fs);
            let url = record.url.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let result = hash_file(fs.as_ref(), &url).await;
                (url, result)
            });

            // Persist whatever already finished so progress survives a
            // failure or cancellation later in the pass.
            while let Some(joined) = tasks.try_join_next() {
                self.persist_hash(joined, stats).await?;
                guard.log_progress(stats.hashed + stats.hash_failures, total, "hashing");
            }
        }

        // Already-spawned work is drained and persisted even when the loop
        // above stopped early.
        while let Some(joined) = tasks.join_next().await {
            self.persist_hash(joined, stats).await?;
            guard.log_progress(stats.hashed + stats.hash_failures, total, "hashing");
        }

        Ok(())
    }

    async fn persist_hash(
        &self,
        joined: std::result::Result<(String, bridge_traits::error::Result<String>), JoinError>,
        stats: &mut DedupStats,
    ) -> Result<()> {
        match joined {
            Ok((url, Ok(hash))) => {
                if self.records.set_file_hash(&url, Some(&hash)).await? {
                    stats.hashed += 1;
                } else {
                    debug!(url = %url, "Record vanished before its hash was stored");
                }
            }
            Ok((url, Err(error))) => {
                warn!(url = %url, %error, "Hashing failed, skipping record");
                stats.hash_failures += 1;
            }
            Err(error) => {
                warn!(%error, "Hashing task failed to join");
                stats.hash_failures += 1;
            }
        }
        Ok(())
    }

    /// Phase 2: point every hashed record at its canonical copy.
    async fn link_duplicates(&self, guard: &JobGuard, stats: &mut DedupStats) -> Result<()> {
        let hashed = self.records.hashed_records().await?;
        let total = hashed.len() as u64;

        for (index, record) in hashed.iter().enumerate() {
            if guard.is_cancelled() {
                stats.cancelled = true;
                return Ok(());
            }

            let hash = match record.file_hash.as_deref() {
                Some(hash) => hash,
                None => continue,
            };

            let canonical = self
                .records
                .find_canonical(hash, record.play_order, &record.url)
                .await?;

            // A hash match against a file that has since disappeared must
            // not produce a dangling link.
            let link = match canonical {
                Some(target) if self.exists_on_disk(&target.url).await => Some(target.url),
                _ => None,
            };

            if record.duplicated_of != link
                && self
                    .records
                    .set_duplicated_of(&record.url, link.as_deref())
                    .await?
            {
                if link.is_some() {
                    stats.linked += 1;
                } else {
                    stats.cleared += 1;
                }
            }

            guard.log_progress(index as u64 + 1, total, "linking duplicates");
        }

        Ok(())
    }

    async fn exists_on_disk(&self, url: &str) -> bool {
        match self.fs.exists(Path::new(url)).await {
            Ok(exists) => exists,
            Err(error) => {
                warn!(url, %error, "Existence check failed, treating file as absent");
                false
            }
        }
    }
}

/// Stream a file through SHA-256 and hex-encode the digest.
async fn hash_file(fs: &dyn FileAccess, url: &str) -> bridge_traits::error::Result<String> {
    let mut stream = fs.open_read_stream(Path::new(url)).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_BYTES];

    loop {
        let read = stream.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{JobId, JobRegistry};
    use async_trait::async_trait;
    use bridge_traits::disk::{DiskEntry, FileMetadata};
    use bridge_traits::error::BridgeError;
    use bridge_traits::time::SystemClock;
    use core_catalog::db::create_test_pool;
    use core_catalog::models::AudioRecord;
    use core_catalog::repositories::SqliteAudioRecordRepository;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory file tree for hashing tests.
    #[derive(Default)]
    struct MemoryFiles {
        contents: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemoryFiles {
        fn put(&self, url: &str, bytes: &[u8]) {
            self.contents
                .lock()
                .unwrap()
                .insert(url.to_string(), bytes.to_vec());
        }

        fn remove(&self, url: &str) {
            self.contents.lock().unwrap().remove(url);
        }
    }

    #[async_trait]
    impl FileAccess for MemoryFiles {
        async fn exists(&self, path: &Path) -> bridge_traits::error::Result<bool> {
            Ok(self
                .contents
                .lock()
                .unwrap()
                .contains_key(&path.display().to_string()))
        }

        async fn metadata(&self, path: &Path) -> bridge_traits::error::Result<FileMetadata> {
            let contents = self.contents.lock().unwrap();
            let bytes = contents
                .get(&path.display().to_string())
                .ok_or_else(|| BridgeError::NotFound(path.display().to_string()))?;
            Ok(FileMetadata {
                size: bytes.len() as u64,
                modified_at: None,
                is_directory: false,
            })
        }

        async fn read_file(&self, path: &Path) -> bridge_traits::error::Result<bytes::Bytes> {
            let contents = self.contents.lock().unwrap();
            contents
                .get(&path.display().to_string())
                .map(|bytes| bytes::Bytes::from(bytes.clone()))
                .ok_or_else(|| BridgeError::NotFound(path.display().to_string()))
        }

        async fn open_read_stream(
            &self,
            path: &Path,
        ) -> bridge_traits::error::Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
            let contents = self.contents.lock().unwrap();
            let bytes = contents
                .get(&path.display().to_string())
                .ok_or_else(|| BridgeError::NotFound(path.display().to_string()))?;
            Ok(Box::new(std::io::Cursor::new(bytes.clone())))
        }

        async fn list_directory(&self, _path: &Path) -> bridge_traits::error::Result<Vec<PathBuf>> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        engine: DedupEngine,
        records: Arc<dyn AudioRecordRepository>,
        files: Arc<MemoryFiles>,
    }

    async fn fixture() -> Fixture {
        let pool = create_test_pool().await.unwrap();
        let records: Arc<dyn AudioRecordRepository> =
            Arc::new(SqliteAudioRecordRepository::new(pool));
        let files = Arc::new(MemoryFiles::default());
        let engine = DedupEngine::new(
            records.clone(),
            files.clone() as Arc<dyn FileAccess>,
            EventBus::new(64),
            2,
        );
        Fixture {
            engine,
            records,
            files,
        }
    }

    fn guard() -> JobGuard {
        let registry = JobRegistry::new(Arc::new(SystemClock), Duration::from_secs(3));
        registry.try_enqueue(JobId::Dedup).unwrap()
    }

    async fn insert_file(fixture: &Fixture, url: &str, play_order: i64, bytes: &[u8]) {
        fixture.files.put(url, bytes);
        let record = AudioRecord::from_disk_entry(
            &DiskEntry::file(url, bytes.len() as u64),
            play_order,
            1_700_000_000,
        );
        fixture.records.insert(&record).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_chain_links_to_smallest_order() {
        let fixture = fixture().await;
        insert_file(&fixture, "/lib/x.mp3", 10, b"identical-bytes").await;
        insert_file(&fixture, "/lib/y.mp3", 20, b"identical-bytes").await;
        insert_file(&fixture, "/lib/z.mp3", 30, b"identical-bytes").await;

        let stats = fixture.engine.compute_duplicates(&guard()).await.unwrap();
        assert_eq!(stats.hashed, 3);
        assert_eq!(stats.linked, 2);

        let x = fixture.records.find_by_url("/lib/x.mp3").await.unwrap().unwrap();
        let y = fixture.records.find_by_url("/lib/y.mp3").await.unwrap().unwrap();
        let z = fixture.records.find_by_url("/lib/z.mp3").await.unwrap().unwrap();

        assert!(x.duplicated_of.is_none(), "Canonical never points anywhere");
        assert_eq!(y.duplicated_of.as_deref(), Some("/lib/x.mp3"));
        assert_eq!(
            z.duplicated_of.as_deref(),
            Some("/lib/x.mp3"),
            "All duplicates reference the canonical, never a chain"
        );
    }

    #[tokio::test]
    async fn test_distinct_content_is_not_linked() {
        let fixture = fixture().await;
        insert_file(&fixture, "/lib/a.mp3", 10, b"first").await;
        insert_file(&fixture, "/lib/b.mp3", 20, b"second").await;

        let stats = fixture.engine.compute_duplicates(&guard()).await.unwrap();
        assert_eq!(stats.hashed, 2);
        assert_eq!(stats.linked, 0);

        let b = fixture.records.find_by_url("/lib/b.mp3").await.unwrap().unwrap();
        assert!(b.duplicated_of.is_none());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let fixture = fixture().await;
        insert_file(&fixture, "/lib/a.mp3", 10, b"same").await;
        insert_file(&fixture, "/lib/b.mp3", 20, b"same").await;

        fixture.engine.compute_duplicates(&guard()).await.unwrap();
        let second = fixture.engine.compute_duplicates(&guard()).await.unwrap();

        assert_eq!(second.hashed, 0);
        assert_eq!(second.linked, 0);
        assert_eq!(second.cleared, 0);
    }

    #[tokio::test]
    async fn test_vanished_canonical_file_is_not_linked() {
        let fixture = fixture().await;
        insert_file(&fixture, "/lib/a.mp3", 10, b"same").await;
        insert_file(&fixture, "/lib/b.mp3", 20, b"same").await;

        fixture.engine.compute_duplicates(&guard()).await.unwrap();

        // The canonical file disappears from disk; the next pass clears
        // the link instead of keeping it dangling.
        fixture.files.remove("/lib/a.mp3");
        let stats = fixture.engine.compute_duplicates(&guard()).await.unwrap();
        assert_eq!(stats.cleared, 1);

        let b = fixture.records.find_by_url("/lib/b.mp3").await.unwrap().unwrap();
        assert!(b.duplicated_of.is_none());
    }

    #[tokio::test]
    async fn test_link_moves_to_new_smallest_order() {
        let fixture = fixture().await;
        insert_file(&fixture, "/lib/a.mp3", 10, b"same").await;
        insert_file(&fixture, "/lib/b.mp3", 20, b"same").await;

        fixture.engine.compute_duplicates(&guard()).await.unwrap();

        // A copy with an even smaller order shows up later.
        insert_file(&fixture, "/lib/0.mp3", 5, b"same").await;
        fixture.engine.compute_duplicates(&guard()).await.unwrap();

        let a = fixture.records.find_by_url("/lib/a.mp3").await.unwrap().unwrap();
        let b = fixture.records.find_by_url("/lib/b.mp3").await.unwrap().unwrap();
        assert_eq!(a.duplicated_of.as_deref(), Some("/lib/0.mp3"));
        assert_eq!(
            b.duplicated_of.as_deref(),
            Some("/lib/0.mp3"),
            "Stale link to the old canonical must be recomputed"
        );
    }

    #[tokio::test]
    async fn test_placeholders_are_not_hashed() {
        let fixture = fixture().await;
        let record = AudioRecord::from_disk_entry(
            &DiskEntry::placeholder("/lib/p.mp3", Some(100)),
            10,
            1_700_000_000,
        );
        fixture.records.insert(&record).await.unwrap();

        let stats = fixture.engine.compute_duplicates(&guard()).await.unwrap();
        assert_eq!(stats.hashed, 0);

        let p = fixture.records.find_by_url("/lib/p.mp3").await.unwrap().unwrap();
        assert!(p.file_hash.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_skipped_not_fatal() {
        let fixture = fixture().await;
        insert_file(&fixture, "/lib/good.mp3", 10, b"bytes").await;

        // Cataloged as downloaded but unreadable on disk.
        let record = AudioRecord::from_disk_entry(&DiskEntry::file("/lib/bad.mp3", 5), 20, 0);
        fixture.records.insert(&record).await.unwrap();

        let stats = fixture.engine.compute_duplicates(&guard()).await.unwrap();
        assert_eq!(stats.hashed, 1);
        assert_eq!(stats.hash_failures, 1);

        let good = fixture
            .records
            .find_by_url("/lib/good.mp3")
            .await
            .unwrap()
            .unwrap();
        assert!(good.file_hash.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_pass_stops_cleanly() {
        let fixture = fixture().await;
        insert_file(&fixture, "/lib/a.mp3", 10, b"same").await;
        insert_file(&fixture, "/lib/b.mp3", 20, b"same").await;

        let registry = JobRegistry::new(Arc::new(SystemClock), Duration::from_secs(3));
        let cancelled = registry.try_enqueue(JobId::Dedup).unwrap();
        registry.request_cancel(JobId::Dedup);

        let stats = fixture.engine.compute_duplicates(&cancelled).await.unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.linked, 0);
    }

    #[tokio::test]
    async fn test_hash_is_hex_sha256() {
        let fixture = fixture().await;
        insert_file(&fixture, "/lib/a.mp3", 10, b"abc").await;

        fixture.engine.compute_duplicates(&guard()).await.unwrap();

        let record = fixture.records.find_by_url("/lib/a.mp3").await.unwrap().unwrap();
        assert_eq!(
            record.file_hash.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }
}
