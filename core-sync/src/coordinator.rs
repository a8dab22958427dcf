//! # Library Coordinator
//!
//! Wires the disk watcher to the catalog engines and exposes the public
//! API of the core.
//!
//! ## Concurrency model
//!
//! All catalog-mutating jobs (reconciliation, dedup, ordering passes,
//! prefetch walks, and the cover scan) are funneled through one
//! maintenance channel drained by a single worker task. That worker is
//! the serialized execution context of the store: no two of those jobs
//! ever run concurrently, so they cannot race on the same records.
//! Commands carry their [`JobGuard`] from enqueue time, which also makes
//! duplicate starts of the same job id no-ops.
//!
//! Quick user operations (like, play count, delete, sticky) are each a
//! single atomic repository transaction and run directly; the maintenance
//! jobs re-validate record existence defensively, and deletes null out
//! duplicate references in the same transaction, so interleaving them
//! between job steps cannot split an invariant.
//!
//! Reads are served straight from the pool and may observe the store
//! mid-pass; consumers already re-render on change events.
//!
//! ## Watcher flow
//!
//! Full-load snapshots are debounced to a minimum interval so bursts of
//! filesystem notifications collapse into one reconciliation pass. A
//! successful pass that changed anything enqueues the dedup job, the
//! cover scan, and a re-application of the last-applied sort mode so new
//! records take their place in the active ordering.

use bridge_traits::disk::{DiskSnapshot, DiskWatcher, FileAccess, WatcherEvent};
use bridge_traits::metadata::MetadataReader;
use bridge_traits::time::Clock;
use core_catalog::models::AudioRecord;
use core_catalog::repositories::{AudioRecordRepository, Page, PageRequest};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus, LibraryEvent, SyncEvent};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::dedup::DedupEngine;
use crate::error::{Result, SyncError};
use crate::navigation::NavigationService;
use crate::ordering::{OrderingService, SortMode};
use crate::prefetch::PrefetchService;
use crate::reconciler::SyncEngine;
use crate::scheduler::{JobGuard, JobId, JobRegistry};

/// Capacity of the maintenance channel. Per-id de-duplication bounds the
/// number of distinct queued tasks to the number of job ids, so this
/// never fills in practice.
const MAINTENANCE_QUEUE_CAPACITY: usize = 32;

/// The last ordering the user applied, re-applied after syncs that
/// inserted records.
#[derive(Debug, Clone)]
struct CurrentSort {
    mode: SortMode,
    sticky: Option<String>,
}

/// A queued maintenance task.
enum Maintenance {
    Reconcile(DiskSnapshot),
    ComputeDuplicates,
    ApplySort {
        mode: SortMode,
        sticky: Option<String>,
    },
    Prefetch {
        from: String,
        count: u32,
    },
    ScanCovers,
}

impl Maintenance {
    fn job_id(&self) -> JobId {
        match self {
            Maintenance::Reconcile(_) => JobId::Reconcile,
            Maintenance::ComputeDuplicates => JobId::Dedup,
            Maintenance::ApplySort { .. } => JobId::Ordering,
            Maintenance::Prefetch { .. } => JobId::Prefetch,
            Maintenance::ScanCovers => JobId::CoverScan,
        }
    }
}

/// Central orchestrator of the catalog core.
pub struct LibraryCoordinator {
    config: CoreConfig,
    records: Arc<dyn AudioRecordRepository>,
    disk: Arc<dyn DiskWatcher>,
    metadata: Option<Arc<dyn MetadataReader>>,
    events: EventBus,
    registry: JobRegistry,
    sync_engine: SyncEngine,
    dedup: DedupEngine,
    ordering: OrderingService,
    navigation: NavigationService,
    prefetch: PrefetchService,
    maintenance_tx: mpsc::Sender<(Maintenance, JobGuard)>,
    current_sort: Mutex<Option<CurrentSort>>,
}

impl LibraryCoordinator {
    /// Create a coordinator and spawn its maintenance worker.
    ///
    /// # Arguments
    ///
    /// * `config` - Engine tuning, validated here
    /// * `records` - The catalog store
    /// * `disk` - Watched-directory bridge
    /// * `fs` - File access bridge used for hashing and existence checks
    /// * `metadata` - Optional cover probe; without it the cover scan is
    ///   skipped
    /// * `clock` - Time source (inject a fake in tests)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn new(
        config: CoreConfig,
        records: Arc<dyn AudioRecordRepository>,
        disk: Arc<dyn DiskWatcher>,
        fs: Arc<dyn FileAccess>,
        metadata: Option<Arc<dyn MetadataReader>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        config.validate().map_err(|e| SyncError::InvalidInput {
            field: "config".to_string(),
            message: e.to_string(),
        })?;

        let events = EventBus::new(config.event_buffer_size);
        let registry = JobRegistry::new(Arc::clone(&clock), config.progress_log_interval());

        let sync_engine = SyncEngine::new(
            Arc::clone(&records),
            events.clone(),
            Arc::clone(&clock),
            config.clone(),
        );
        let dedup = DedupEngine::new(
            Arc::clone(&records),
            fs,
            events.clone(),
            config.hash_concurrency,
        );
        let ordering = OrderingService::new(Arc::clone(&records), events.clone(), config.clone());
        let navigation = NavigationService::new(Arc::clone(&records));
        let prefetch = PrefetchService::new(navigation.clone(), Arc::clone(&disk));

        let (maintenance_tx, maintenance_rx) = mpsc::channel(MAINTENANCE_QUEUE_CAPACITY);

        let coordinator = Arc::new(Self {
            config,
            records,
            disk,
            metadata,
            events,
            registry,
            sync_engine,
            dedup,
            ordering,
            navigation,
            prefetch,
            maintenance_tx,
            current_sort: Mutex::new(None),
        });

        Arc::clone(&coordinator).spawn_maintenance_worker(maintenance_rx);
        Ok(coordinator)
    }

    /// Start observing the library directory.
    ///
    /// Spawns the watcher loop; returns once the watch subscription is
    /// established.
    #[instrument(skip(self), fields(directory = %directory.display()))]
    pub async fn start(self: &Arc<Self>, directory: &Path) -> Result<()> {
        let receiver = self.disk.watch(directory).await?;
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.watch_loop(receiver).await });
        info!("Library coordinator started");
        Ok(())
    }

    /// Stop all jobs and both worker loops. Used on app backgrounding.
    pub fn shutdown(&self) {
        self.registry.cancel_all();
    }

    // ------------------------------------------------------------------
    // Event & query surface
    // ------------------------------------------------------------------

    /// Subscribe to core events.
    pub fn subscribe(&self) -> core_runtime::events::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// The navigation query surface.
    pub fn navigation(&self) -> &NavigationService {
        &self.navigation
    }

    /// The job registry, for cancellation and state inspection.
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Look up a single record.
    pub async fn find(&self, url: &str) -> Result<Option<AudioRecord>> {
        Ok(self.records.find_by_url(url).await?)
    }

    /// Page through the catalog in the active ordering.
    pub async fn paginate(&self, request: PageRequest) -> Result<Page<AudioRecord>> {
        Ok(self.records.paginate(request).await?)
    }

    /// Number of records marked as duplicates of the given URL.
    pub async fn count_duplicates_of(&self, url: &str) -> Result<i64> {
        Ok(self.records.count_duplicates_of(url).await?)
    }

    /// All liked records in the active ordering.
    pub async fn liked_records(&self) -> Result<Vec<AudioRecord>> {
        Ok(self.records.liked().await?)
    }

    // ------------------------------------------------------------------
    // Maintenance triggers
    // ------------------------------------------------------------------

    /// Queue a sequential ordering pass and remember it for re-application
    /// after future syncs. Returns false when an ordering pass is already
    /// scheduled.
    pub fn sort_sequential(&self, sticky: Option<String>) -> bool {
        self.set_current_sort(SortMode::Sequential, sticky.clone());
        self.enqueue(Maintenance::ApplySort {
            mode: SortMode::Sequential,
            sticky,
        })
    }

    /// Queue a random ordering pass; same contract as
    /// [`sort_sequential`](LibraryCoordinator::sort_sequential).
    pub fn sort_random(&self, sticky: Option<String>) -> bool {
        self.set_current_sort(SortMode::Random, sticky.clone());
        self.enqueue(Maintenance::ApplySort {
            mode: SortMode::Random,
            sticky,
        })
    }

    /// Queue a dedup pass.
    pub fn compute_duplicates(&self) -> bool {
        self.enqueue(Maintenance::ComputeDuplicates)
    }

    /// Queue a cover scan.
    pub fn scan_covers(&self) -> bool {
        self.enqueue(Maintenance::ScanCovers)
    }

    /// Queue a prefetch walk from the given cursor.
    pub fn prefetch_from(&self, url: &str) -> bool {
        self.enqueue(Maintenance::Prefetch {
            from: url.to_string(),
            count: self.config.prefetch_count,
        })
    }

    /// Request cancellation of a job at its next checkpoint.
    pub fn cancel_job(&self, id: JobId) {
        self.registry.request_cancel(id);
    }

    // ------------------------------------------------------------------
    // User operations
    // ------------------------------------------------------------------

    /// Pin a record to the front of the active ordering.
    pub async fn sticky(&self, url: &str) -> Result<()> {
        self.ordering.sticky(url).await?;

        let mut current = self
            .current_sort
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(sort) = current.as_mut() {
            sort.sticky = Some(url.to_string());
        }
        Ok(())
    }

    /// Set the liked flag on a record.
    ///
    /// # Errors
    ///
    /// A vanished record is a logged failure for this explicit user
    /// action, unlike the no-op semantics of navigation reads.
    pub async fn set_liked(&self, url: &str, liked: bool) -> Result<()> {
        if !self.records.set_liked(url, liked).await? {
            warn!(url, "Cannot change liked flag, record vanished");
            return Err(SyncError::RecordNotFound {
                url: url.to_string(),
            });
        }
        self.events
            .emit(CoreEvent::Library(LibraryEvent::Updated))
            .ok();
        Ok(())
    }

    /// Bump a record's play counter.
    pub async fn mark_played(&self, url: &str) -> Result<()> {
        if !self.records.increment_play_count(url).await? {
            warn!(url, "Cannot count playback, record vanished");
            return Err(SyncError::RecordNotFound {
                url: url.to_string(),
            });
        }
        self.events
            .emit(CoreEvent::Library(LibraryEvent::Updated))
            .ok();
        Ok(())
    }

    /// Delete a record: the file through the disk bridge first, then the
    /// catalog row (which also nulls duplicate references to it).
    pub async fn delete(&self, url: &str) -> Result<()> {
        self.disk.delete(url).await?;

        if self.records.delete(url).await? {
            self.events
                .emit(CoreEvent::Library(LibraryEvent::Deleted {
                    urls: vec![url.to_string()],
                }))
                .ok();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn set_current_sort(&self, mode: SortMode, sticky: Option<String>) {
        let mut current = self
            .current_sort
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *current = Some(CurrentSort { mode, sticky });
    }

    fn current_sort(&self) -> Option<CurrentSort> {
        self.current_sort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Schedule a maintenance task. Returns false when an instance of the
    /// job is already queued or running, or the worker is gone.
    fn enqueue(&self, task: Maintenance) -> bool {
        let Some(guard) = self.registry.try_enqueue(task.job_id()) else {
            return false;
        };

        match self.maintenance_tx.try_send((task, guard)) {
            Ok(()) => true,
            Err(error) => {
                // Guard drops here, returning the job to idle.
                warn!(%error, "Maintenance queue unavailable, dropping task");
                false
            }
        }
    }

    fn spawn_maintenance_worker(self: Arc<Self>, mut rx: mpsc::Receiver<(Maintenance, JobGuard)>) {
        tokio::spawn(async move {
            let shutdown = self.registry.shutdown_token();
            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = rx.recv() => next,
                };
                let Some((task, guard)) = next else { break };

                if guard.is_cancelled() {
                    continue;
                }
                guard.begin();
                self.run_maintenance(task, &guard).await;
            }
            debug!("Maintenance worker stopped");
        });
    }

    async fn run_maintenance(&self, task: Maintenance, guard: &JobGuard) {
        match task {
            Maintenance::Reconcile(snapshot) => {
                match self.sync_engine.reconcile(&snapshot, guard).await {
                    Ok(stats) => {
                        if !stats.is_noop() {
                            self.enqueue(Maintenance::ComputeDuplicates);
                            if self.metadata.is_some() {
                                self.enqueue(Maintenance::ScanCovers);
                            }
                            if stats.added > 0 {
                                if let Some(sort) = self.current_sort() {
                                    self.enqueue(Maintenance::ApplySort {
                                        mode: sort.mode,
                                        sticky: sort.sticky,
                                    });
                                }
                            }
                        }
                    }
                    Err(SyncError::Cancelled) => {
                        info!("Reconciliation cancelled");
                    }
                    Err(error) => {
                        error!(%error, "Reconciliation failed, pass abandoned");
                        self.events
                            .emit(CoreEvent::Sync(SyncEvent::Failed {
                                message: error.to_string(),
                                recoverable: true,
                            }))
                            .ok();
                    }
                }
            }
            Maintenance::ComputeDuplicates => {
                if let Err(error) = self.dedup.compute_duplicates(guard).await {
                    error!(%error, "Dedup pass failed");
                }
            }
            Maintenance::ApplySort { mode, sticky } => {
                match self.ordering.apply(mode, sticky.as_deref(), guard).await {
                    Ok(()) => {}
                    Err(SyncError::Cancelled) => info!("Ordering pass cancelled"),
                    Err(error) => error!(%error, "Ordering pass failed"),
                }
            }
            Maintenance::Prefetch { from, count } => {
                if let Err(error) = self.prefetch.download_ahead(&from, count, guard).await {
                    warn!(%error, "Prefetch walk failed");
                }
            }
            Maintenance::ScanCovers => {
                if let Err(error) = self.run_cover_scan(guard).await {
                    warn!(%error, "Cover scan failed");
                }
            }
        }
    }

    async fn watch_loop(self: Arc<Self>, mut receiver: mpsc::Receiver<WatcherEvent>) {
        let shutdown = self.registry.shutdown_token();
        let mut last_full: Option<Instant> = None;

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = receiver.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                WatcherEvent::Snapshot(snapshot) => {
                    if snapshot.is_full_load {
                        // Bursts of filesystem notifications collapse into
                        // one pass per debounce window.
                        if let Some(previous) = last_full {
                            let debounce = self.config.debounce_interval();
                            let elapsed = previous.elapsed();
                            if elapsed < debounce {
                                tokio::time::sleep(debounce - elapsed).await;
                            }
                        }
                        last_full = Some(Instant::now());
                    }
                    self.enqueue(Maintenance::Reconcile(snapshot));
                }
                WatcherEvent::DownloadProgress { url, percent } => {
                    self.handle_download_progress(&url, percent).await;
                }
            }
        }
        debug!("Watcher loop stopped");
    }

    async fn handle_download_progress(&self, url: &str, percent: u8) {
        let progress = f64::from(percent.min(100)) / 100.0;
        match self.records.set_download_progress(url, progress).await {
            Ok(true) => {
                self.events
                    .emit(CoreEvent::Download(DownloadEvent::Progress {
                        url: url.to_string(),
                        percent: percent.min(100),
                    }))
                    .ok();
            }
            Ok(false) => debug!(url, "Download progress for a file not in the catalog"),
            Err(error) => warn!(url, %error, "Failed to persist download progress"),
        }
    }

    /// Flag records that carry embedded cover art.
    ///
    /// Probe failures are non-fatal; the record is simply retried on the
    /// next scan.
    async fn run_cover_scan(&self, guard: &JobGuard) -> Result<u64> {
        let Some(reader) = &self.metadata else {
            return Ok(0);
        };

        let candidates: Vec<AudioRecord> = self
            .records
            .all("cover-scan")
            .await?
            .into_iter()
            .filter(|record| !record.has_cover && !record.is_folder && record.is_downloaded())
            .collect();
        let total = candidates.len() as u64;
        let mut flagged = 0u64;

        for (index, record) in candidates.iter().enumerate() {
            if guard.is_cancelled() {
                break;
            }

            match reader.read_cover(&record.url).await {
                Ok(Some(_)) => {
                    if self.records.set_has_cover(&record.url, true).await? {
                        flagged += 1;
                    }
                }
                Ok(None) => {}
                Err(error) => debug!(url = %record.url, %error, "Cover probe failed, skipping"),
            }

            guard.log_progress(index as u64 + 1, total, "scanning covers");
        }

        if flagged > 0 {
            self.events
                .emit(CoreEvent::Library(LibraryEvent::Updated))
                .ok();
        }
        Ok(flagged)
    }
}

impl std::fmt::Debug for LibraryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryCoordinator")
            .field("config", &self.config)
            .finish()
    }
}
