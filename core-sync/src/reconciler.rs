//! # Snapshot Reconciliation
//!
//! Diffs a disk snapshot against the persisted catalog and applies the
//! difference.
//!
//! ## Overview
//!
//! A **full load** builds a `url → entry` map over the snapshot, walks
//! every existing record exactly once (absent from the map → delete,
//! present → refresh mutable fields and consume the map entry), then
//! inserts a fresh record for every entry left in the map. The pass costs
//! O(|catalog| + |snapshot|) store operations.
//!
//! An **incremental update** only applies the delta: deletion markers
//! remove matching records, unknown urls are inserted, and records that
//! already exist are left untouched so the pass cannot race concurrent
//! metadata jobs on fields it does not own.
//!
//! Running the same snapshot twice produces no mutations the second time:
//! refreshes only write when a field actually changed, inserts are keyed
//! by url, and deletes of missing records are no-ops.
//!
//! Persistence errors abandon the pass; the next watcher event re-attempts
//! the same idempotent diff, so there is no inline retry loop.

use bridge_traits::disk::DiskSnapshot;
use bridge_traits::time::Clock;
use core_catalog::models::AudioRecord;
use core_catalog::repositories::AudioRecordRepository;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, SyncEvent};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::error::{Result, SyncError};
use crate::scheduler::JobGuard;

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileStats {
    /// Records inserted for entries the catalog had never seen.
    pub added: u64,
    /// Records whose mutable disk state changed.
    pub updated: u64,
    /// Records deleted because their file is gone.
    pub removed: u64,
}

impl ReconcileStats {
    /// Whether the pass mutated the catalog at all.
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

/// Reconciles disk snapshots against the catalog store.
pub struct SyncEngine {
    records: Arc<dyn AudioRecordRepository>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    config: CoreConfig,
}

impl SyncEngine {
    /// Create a new sync engine.
    pub fn new(
        records: Arc<dyn AudioRecordRepository>,
        events: EventBus,
        clock: Arc<dyn Clock>,
        config: CoreConfig,
    ) -> Self {
        Self {
            records,
            events,
            clock,
            config,
        }
    }

    /// Apply a snapshot to the catalog.
    ///
    /// Emits `Sync(Syncing)` before processing, periodic progress during
    /// large passes, `Library(Deleted)` for removals, and `Sync(Synced)`
    /// after the pass committed. The caller owns failure reporting.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] when the job guard trips at a
    /// checkpoint; store errors bubble up and abandon the pass.
    #[instrument(skip_all, fields(entries = snapshot.entries.len(), full_load = snapshot.is_full_load))]
    pub async fn reconcile(
        &self,
        snapshot: &DiskSnapshot,
        guard: &JobGuard,
    ) -> Result<ReconcileStats> {
        let total = snapshot.entries.len() as u64;
        self.events
            .emit(CoreEvent::Sync(SyncEvent::Syncing { current: 0, total }))
            .ok();

        let stats = if snapshot.is_full_load {
            self.reconcile_full(snapshot, guard, total).await?
        } else {
            self.reconcile_incremental(snapshot, guard, total).await?
        };

        self.events
            .emit(CoreEvent::Sync(SyncEvent::Synced {
                added: stats.added,
                updated: stats.updated,
                removed: stats.removed,
            }))
            .ok();

        info!(
            added = stats.added,
            updated = stats.updated,
            removed = stats.removed,
            "Reconciliation completed"
        );

        Ok(stats)
    }

    /// Full diff: the snapshot is authoritative for the whole directory.
    async fn reconcile_full(
        &self,
        snapshot: &DiskSnapshot,
        guard: &JobGuard,
        total: u64,
    ) -> Result<ReconcileStats> {
        let mut pending = HashMap::with_capacity(snapshot.entries.len());
        for entry in &snapshot.entries {
            if !entry.is_deleted {
                pending.insert(entry.url.clone(), entry.clone());
            }
        }

        let existing = self.records.all("reconcile-full").await?;
        let mut used_orders: HashSet<i64> =
            existing.iter().map(|record| record.play_order).collect();

        let now = self.clock.unix_timestamp();
        let mut stats = ReconcileStats::default();
        let mut deleted_urls = Vec::new();
        let mut processed = 0u64;

        for record in existing {
            if guard.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match pending.remove(&record.url) {
                Some(entry) => {
                    let mut refreshed = record;
                    if refreshed.apply_disk_state(&entry, now) {
                        self.records.update(&refreshed).await?;
                        stats.updated += 1;
                    }
                }
                None => {
                    if self.records.delete(&record.url).await? {
                        deleted_urls.push(record.url);
                        stats.removed += 1;
                    }
                }
            }

            processed += 1;
            guard.log_progress(processed, total, "reconciling");
            if processed % 10 == 0 {
                self.events
                    .emit(CoreEvent::Sync(SyncEvent::Syncing {
                        current: processed,
                        total,
                    }))
                    .ok();
            }
        }

        // Everything left in the map is new on disk.
        for entry in pending.into_values() {
            if guard.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let play_order = self.random_unique_order(&mut used_orders);
            let record = AudioRecord::from_disk_entry(&entry, play_order, now);
            self.records.insert(&record).await?;
            stats.added += 1;
        }

        if !deleted_urls.is_empty() {
            self.events
                .emit(CoreEvent::Library(LibraryEvent::Deleted {
                    urls: deleted_urls,
                }))
                .ok();
        }

        Ok(stats)
    }

    /// Delta update: only the listed entries changed on disk.
    async fn reconcile_incremental(
        &self,
        snapshot: &DiskSnapshot,
        guard: &JobGuard,
        total: u64,
    ) -> Result<ReconcileStats> {
        let now = self.clock.unix_timestamp();
        let mut stats = ReconcileStats::default();
        let mut deleted_urls = Vec::new();
        let mut used_orders = HashSet::new();

        for (index, entry) in snapshot.entries.iter().enumerate() {
            if guard.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            if entry.is_deleted {
                if self.records.delete(&entry.url).await? {
                    deleted_urls.push(entry.url.clone());
                    stats.removed += 1;
                }
            } else if self.records.find_by_url(&entry.url).await?.is_none() {
                let play_order = self.random_unique_order(&mut used_orders);
                let record = AudioRecord::from_disk_entry(entry, play_order, now);
                self.records.insert(&record).await?;
                stats.added += 1;
            }
            // Existing records are left untouched; refreshing them here
            // would race the metadata jobs that own those fields.

            guard.log_progress(index as u64 + 1, total, "applying delta");
        }

        if !deleted_urls.is_empty() {
            self.events
                .emit(CoreEvent::Library(LibraryEvent::Deleted {
                    urls: deleted_urls,
                }))
                .ok();
        }

        Ok(stats)
    }

    /// Draw a pseudo-random order that is unique within this pass.
    ///
    /// New files land at an arbitrary point of the random ordering instead
    /// of jumping to the front; the range is wide enough that retries are
    /// rare.
    fn random_unique_order(&self, used: &mut HashSet<i64>) -> i64 {
        let mut rng = rand::thread_rng();
        loop {
            let candidate = rng
                .gen_range(self.config.sequential_order_base..self.config.random_order_max);
            if used.insert(candidate) {
                return candidate;
            }
        }
    }
}
