//! # Ordering Service
//!
//! Assigns and maintains the integer `play_order` of every record.
//!
//! Two full-catalog passes exist: **sequential** sorts by case-insensitive
//! title and assigns increasing orders from a reserved base upward, and
//! **random** draws a fresh pseudo-random order for every record from a
//! wide range (no shuffle of a dense list needed, collisions stay
//! improbable). Both passes pin the optional sticky record to the reserved
//! order `0`, mutate the whole catalog in a single transaction, and
//! bracket the work with sorting events for the UI.
//!
//! `sticky` alone is not a re-sort: it swaps two records' orders in one
//! transaction and leaves everything else where it was.

use core_catalog::models::{AudioRecord, STICKY_ORDER};
use core_catalog::repositories::AudioRecordRepository;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, SortEvent};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::error::{Result, SyncError};
use crate::scheduler::JobGuard;

/// The two supported orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Alphabetic by title, case-insensitive
    Sequential,
    /// Fresh pseudo-random order per record
    Random,
}

impl SortMode {
    /// Get the string representation for events and logging
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::Sequential => "sequential",
            SortMode::Random => "random",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SortMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(SortMode::Sequential),
            "random" => Ok(SortMode::Random),
            _ => Err(SyncError::InvalidInput {
                field: "sort_mode".to_string(),
                message: format!("Unknown sort mode: {s}"),
            }),
        }
    }
}

/// Applies orderings and the sticky swap.
pub struct OrderingService {
    records: Arc<dyn AudioRecordRepository>,
    events: EventBus,
    config: CoreConfig,
}

impl OrderingService {
    /// Create a new ordering service.
    pub fn new(
        records: Arc<dyn AudioRecordRepository>,
        events: EventBus,
        config: CoreConfig,
    ) -> Self {
        Self {
            records,
            events,
            config,
        }
    }

    /// Re-order the full catalog.
    ///
    /// Emits `Sort(Started)` before mutating and `Sort(Done)` after the
    /// single-transaction commit. A cancellation before the commit leaves
    /// every order untouched.
    #[instrument(skip(self, guard), fields(mode = %mode))]
    pub async fn apply(
        &self,
        mode: SortMode,
        sticky: Option<&str>,
        guard: &JobGuard,
    ) -> Result<()> {
        self.events
            .emit(CoreEvent::Sort(SortEvent::Started {
                mode: mode.as_str().to_string(),
            }))
            .ok();

        let records = self.records.all("ordering").await?;
        let total = records.len() as u64;

        let orders = match mode {
            SortMode::Sequential => self.sequential_orders(&records, sticky),
            SortMode::Random => self.random_orders(&records, sticky),
        };

        // The whole pass persists as one transaction; cancellation can
        // only land before it, never between records.
        if guard.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        self.records.update_orders(&orders).await?;

        self.events.emit(CoreEvent::Sort(SortEvent::Done)).ok();
        info!(records = total, "Ordering pass committed");
        Ok(())
    }

    /// Pin a record to the front of the active ordering.
    ///
    /// Constant-time: the promoted record takes the reserved order and the
    /// previous holder takes the promoted record's former order, in one
    /// transaction. Pinning the record that is already sticky is a no-op.
    #[instrument(skip(self))]
    pub async fn sticky(&self, url: &str) -> Result<()> {
        let record = self.records.find_by_url(url).await?.ok_or_else(|| {
            warn!(url, "Cannot pin a record that is not in the catalog");
            SyncError::RecordNotFound {
                url: url.to_string(),
            }
        })?;

        if record.play_order == STICKY_ORDER {
            return Ok(());
        }

        let mut orders = vec![(record.url.clone(), STICKY_ORDER)];
        if let Some(previous) = self.records.find_sticky().await? {
            orders.push((previous.url, record.play_order));
        }

        self.records.update_orders(&orders).await?;
        self.events
            .emit(CoreEvent::Library(LibraryEvent::Updated))
            .ok();

        info!(url, "Record pinned to front");
        Ok(())
    }

    fn sequential_orders(
        &self,
        records: &[AudioRecord],
        sticky: Option<&str>,
    ) -> Vec<(String, i64)> {
        let mut sorted: Vec<&AudioRecord> = records
            .iter()
            .filter(|record| Some(record.url.as_str()) != sticky)
            .collect();
        sorted.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.url.cmp(&b.url))
        });

        let mut orders = Vec::with_capacity(records.len());
        self.push_sticky(&mut orders, records, sticky);
        orders.extend(sorted.iter().enumerate().map(|(index, record)| {
            (
                record.url.clone(),
                self.config.sequential_order_base + index as i64,
            )
        }));
        orders
    }

    fn random_orders(&self, records: &[AudioRecord], sticky: Option<&str>) -> Vec<(String, i64)> {
        let mut rng = rand::thread_rng();
        let mut used = HashSet::new();
        let mut orders = Vec::with_capacity(records.len());
        self.push_sticky(&mut orders, records, sticky);

        for record in records {
            if Some(record.url.as_str()) == sticky {
                continue;
            }
            let play_order = loop {
                let candidate = rng
                    .gen_range(self.config.sequential_order_base..self.config.random_order_max);
                if used.insert(candidate) {
                    break candidate;
                }
            };
            orders.push((record.url.clone(), play_order));
        }
        orders
    }

    fn push_sticky(
        &self,
        orders: &mut Vec<(String, i64)>,
        records: &[AudioRecord],
        sticky: Option<&str>,
    ) {
        if let Some(url) = sticky {
            if records.iter().any(|record| record.url == url) {
                orders.push((url.to_string(), STICKY_ORDER));
            } else {
                warn!(url, "Sticky record is not in the catalog, ignoring");
            }
        }
    }
}
