//! # Job Registry & Scheduling
//!
//! Background work on the catalog runs as named jobs with a small, shared
//! state machine per job id:
//!
//! ```text
//! Idle → Queued → Running → Idle
//!           ↓         ↓
//!      CancelRequested (observed at per-record checkpoints)
//! ```
//!
//! The registry guarantees exactly one instance of a given job id is
//! scheduled at a time; a duplicate start while the job is queued or
//! running is a no-op, logged at most once per busy period. Cancellation
//! is cooperative: jobs poll [`JobGuard::is_cancelled`] between records
//! and never get interrupted mid-write. A global shutdown token covers
//! app-backgrounding style "stop everything" requests and is checked at
//! the same checkpoints.
//!
//! Progress logging goes through the registry too, so a job touching ten
//! thousand records emits one line every few seconds instead of one per
//! record.

use bridge_traits::time::Clock;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SyncError;

/// Identifiers of the background jobs the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobId {
    /// Snapshot reconciliation
    Reconcile,
    /// Content hashing + duplicate linking
    Dedup,
    /// Sequential/random ordering pass
    Ordering,
    /// Download-ahead prefetching
    Prefetch,
    /// Cover-art flag refresh
    CoverScan,
}

impl JobId {
    /// Get the string representation for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            JobId::Reconcile => "reconcile",
            JobId::Dedup => "dedup",
            JobId::Ordering => "ordering",
            JobId::Prefetch => "prefetch",
            JobId::CoverScan => "cover-scan",
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reconcile" => Ok(JobId::Reconcile),
            "dedup" => Ok(JobId::Dedup),
            "ordering" => Ok(JobId::Ordering),
            "prefetch" => Ok(JobId::Prefetch),
            "cover-scan" => Ok(JobId::CoverScan),
            _ => Err(SyncError::InvalidInput {
                field: "job_id".to_string(),
                message: format!("Unknown job id: {s}"),
            }),
        }
    }
}

/// The scheduling state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    /// Not scheduled
    #[default]
    Idle,
    /// Accepted into the maintenance queue, not yet executing
    Queued,
    /// Currently executing
    Running,
    /// Cancellation requested; the job stops at its next checkpoint
    CancelRequested,
}

#[derive(Debug, Default)]
struct JobEntry {
    state: JobState,
    last_log_millis: Option<i64>,
    busy_logged: bool,
}

struct RegistryInner {
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    shutdown: CancellationToken,
    clock: Arc<dyn Clock>,
    log_interval: Duration,
}

/// Shared registry of job states.
///
/// Cheap to clone (all clones share state); handed to job functions
/// explicitly through [`JobGuard`], so there are no ambient "should stop"
/// globals.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<RegistryInner>,
}

impl JobRegistry {
    /// Create a registry.
    ///
    /// # Arguments
    ///
    /// * `clock` - Time source for progress-log rate limiting
    /// * `log_interval` - Minimum interval between progress log lines
    pub fn new(clock: Arc<dyn Clock>, log_interval: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                jobs: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                clock,
                log_interval,
            }),
        }
    }

    /// Try to schedule a job.
    ///
    /// Returns a guard when the job was idle; `None` when an instance is
    /// already queued or running (logged at most once per busy period) or
    /// the registry is shut down. Dropping the guard returns the job to
    /// `Idle`.
    pub fn try_enqueue(&self, id: JobId) -> Option<JobGuard> {
        if self.inner.shutdown.is_cancelled() {
            debug!(job = %id, "Registry shut down, rejecting job");
            return None;
        }

        let mut jobs = self
            .inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = jobs.entry(id).or_default();

        match entry.state {
            JobState::Idle => {
                entry.state = JobState::Queued;
                entry.busy_logged = false;
                entry.last_log_millis = None;
                Some(JobGuard {
                    registry: self.clone(),
                    id,
                })
            }
            _ => {
                if !entry.busy_logged {
                    info!(job = %id, "Job already scheduled, ignoring duplicate start");
                    entry.busy_logged = true;
                }
                None
            }
        }
    }

    /// Request cooperative cancellation of a job.
    ///
    /// The job observes the request at its next checkpoint; a job that is
    /// not scheduled is left untouched.
    pub fn request_cancel(&self, id: JobId) {
        let mut jobs = self
            .inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = jobs.get_mut(&id) {
            if matches!(entry.state, JobState::Queued | JobState::Running) {
                entry.state = JobState::CancelRequested;
                info!(job = %id, "Cancellation requested");
            }
        }
    }

    /// Cancel every job and reject new ones. Used for global shutdown.
    pub fn cancel_all(&self) {
        info!("Stopping all jobs");
        self.inner.shutdown.cancel();
    }

    /// Whether a job should stop at its next checkpoint.
    pub fn is_cancelled(&self, id: JobId) -> bool {
        if self.inner.shutdown.is_cancelled() {
            return true;
        }
        let jobs = self
            .inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        matches!(
            jobs.get(&id).map(|e| e.state),
            Some(JobState::CancelRequested)
        )
    }

    /// Current state of a job.
    pub fn state(&self, id: JobId) -> JobState {
        let jobs = self
            .inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        jobs.get(&id).map(|e| e.state).unwrap_or_default()
    }

    /// Token cancelled by [`cancel_all`](JobRegistry::cancel_all); loops
    /// outside the job machinery select on it for shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    fn begin(&self, id: JobId) {
        let mut jobs = self
            .inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = jobs.get_mut(&id) {
            if entry.state == JobState::Queued {
                entry.state = JobState::Running;
            }
        }
    }

    fn finish(&self, id: JobId) {
        let mut jobs = self
            .inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = jobs.get_mut(&id) {
            entry.state = JobState::Idle;
            entry.busy_logged = false;
            entry.last_log_millis = None;
        }
    }

    /// Rate-limited progress logging; returns whether a line was emitted.
    fn log_progress(&self, id: JobId, current: u64, total: u64, phase: &str) -> bool {
        let now = self.inner.clock.unix_timestamp_millis();
        let mut jobs = self
            .inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = jobs.entry(id).or_default();

        let due = match entry.last_log_millis {
            None => true,
            Some(last) => now - last >= self.inner.log_interval.as_millis() as i64,
        };

        if due {
            entry.last_log_millis = Some(now);
            info!(job = %id, current, total, phase, "Job progress");
        }

        due
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("shutdown", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

/// RAII handle for a scheduled job.
///
/// Carries the registry reference into the job function; dropping it
/// (normal completion, cancellation, or panic unwind) returns the job to
/// `Idle` so the id can be scheduled again.
pub struct JobGuard {
    registry: JobRegistry,
    id: JobId,
}

impl JobGuard {
    /// The job this guard belongs to.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Mark the job as executing (Queued → Running).
    pub fn begin(&self) {
        self.registry.begin(self.id);
    }

    /// Checkpoint: whether the job should stop now.
    pub fn is_cancelled(&self) -> bool {
        self.registry.is_cancelled(self.id)
    }

    /// Rate-limited progress logging; returns whether a line was emitted.
    pub fn log_progress(&self, current: u64, total: u64, phase: &str) -> bool {
        self.registry.log_progress(self.id, current, total, phase)
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.finish(self.id);
    }
}

impl fmt::Debug for JobGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobGuard").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::SystemClock;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock with manually advanced time.
    struct FakeClock {
        millis: AtomicI64,
    }

    impl FakeClock {
        fn new() -> Self {
            Self {
                millis: AtomicI64::new(0),
            }
        }

        fn advance(&self, millis: i64) {
            self.millis.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
                .unwrap()
        }
    }

    fn registry() -> JobRegistry {
        JobRegistry::new(Arc::new(SystemClock), Duration::from_secs(3))
    }

    #[test]
    fn test_job_id_round_trip() {
        for id in [
            JobId::Reconcile,
            JobId::Dedup,
            JobId::Ordering,
            JobId::Prefetch,
            JobId::CoverScan,
        ] {
            assert_eq!(id.as_str().parse::<JobId>().unwrap(), id);
        }
        assert!("bogus".parse::<JobId>().is_err());
    }

    #[test]
    fn test_enqueue_and_finish() {
        let registry = registry();
        assert_eq!(registry.state(JobId::Dedup), JobState::Idle);

        let guard = registry.try_enqueue(JobId::Dedup).unwrap();
        assert_eq!(registry.state(JobId::Dedup), JobState::Queued);
        assert_eq!(guard.id(), JobId::Dedup);

        guard.begin();
        assert_eq!(registry.state(JobId::Dedup), JobState::Running);

        drop(guard);
        assert_eq!(registry.state(JobId::Dedup), JobState::Idle);
    }

    #[test]
    fn test_duplicate_start_is_noop() {
        let registry = registry();

        let _guard = registry.try_enqueue(JobId::Reconcile).unwrap();
        assert!(registry.try_enqueue(JobId::Reconcile).is_none());
        assert!(registry.try_enqueue(JobId::Reconcile).is_none());

        // A different job is unaffected.
        assert!(registry.try_enqueue(JobId::Dedup).is_some());
    }

    #[test]
    fn test_reschedulable_after_drop() {
        let registry = registry();

        let guard = registry.try_enqueue(JobId::Ordering).unwrap();
        drop(guard);
        assert!(registry.try_enqueue(JobId::Ordering).is_some());
    }

    #[test]
    fn test_cancel_observed_at_checkpoint() {
        let registry = registry();
        let guard = registry.try_enqueue(JobId::Dedup).unwrap();
        guard.begin();

        assert!(!guard.is_cancelled());
        registry.request_cancel(JobId::Dedup);
        assert!(guard.is_cancelled());
        assert_eq!(registry.state(JobId::Dedup), JobState::CancelRequested);

        drop(guard);
        assert_eq!(registry.state(JobId::Dedup), JobState::Idle);
    }

    #[test]
    fn test_cancel_idle_job_is_noop() {
        let registry = registry();
        registry.request_cancel(JobId::Prefetch);
        assert_eq!(registry.state(JobId::Prefetch), JobState::Idle);
    }

    #[test]
    fn test_cancel_all_stops_everything() {
        let registry = registry();
        let guard = registry.try_enqueue(JobId::Dedup).unwrap();

        registry.cancel_all();
        assert!(guard.is_cancelled());
        assert!(registry.shutdown_token().is_cancelled());

        drop(guard);
        assert!(
            registry.try_enqueue(JobId::Dedup).is_none(),
            "Shut-down registry rejects new jobs"
        );
    }

    #[test]
    fn test_progress_logging_is_rate_limited() {
        let clock = Arc::new(FakeClock::new());
        let registry = JobRegistry::new(clock.clone() as Arc<dyn Clock>, Duration::from_secs(3));

        let guard = registry.try_enqueue(JobId::Dedup).unwrap();
        guard.begin();

        assert!(guard.log_progress(1, 100, "hashing"), "First line always logs");
        assert!(!guard.log_progress(2, 100, "hashing"));
        assert!(!guard.log_progress(3, 100, "hashing"));

        clock.advance(3_000);
        assert!(guard.log_progress(4, 100, "hashing"));
        assert!(!guard.log_progress(5, 100, "hashing"));
    }
}
