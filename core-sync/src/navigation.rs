//! # Navigation Service
//!
//! Answers next/previous/first queries against the active ordering, with
//! wraparound at both ends. Folders never take part in navigation.
//!
//! Unknown URLs yield `None` rather than an error: navigation runs on
//! every track change, and a record deleted between the UI's query and the
//! lookup is ordinary here, not exceptional.

use core_catalog::models::AudioRecord;
use core_catalog::repositories::AudioRecordRepository;
use std::sync::Arc;

use crate::error::Result;

/// Read-only traversal over the catalog ordering.
#[derive(Clone)]
pub struct NavigationService {
    records: Arc<dyn AudioRecordRepository>,
}

impl NavigationService {
    /// Create a new navigation service.
    pub fn new(records: Arc<dyn AudioRecordRepository>) -> Self {
        Self { records }
    }

    /// The record following `current_url` in the active ordering.
    ///
    /// Wraps to [`first`](NavigationService::first) past the end; a
    /// single-record catalog self-loops. Duplicate order values are
    /// tolerated because the current URL itself is excluded from the
    /// lookup.
    pub async fn next(&self, current_url: &str) -> Result<Option<AudioRecord>> {
        let Some(current) = self.records.find_by_url(current_url).await? else {
            return Ok(None);
        };

        match self
            .records
            .next_after(current.play_order, &current.url)
            .await?
        {
            Some(record) => Ok(Some(record)),
            None => Ok(self.records.first().await?),
        }
    }

    /// The record preceding `current_url`, wrapping to the last record.
    pub async fn prev(&self, current_url: &str) -> Result<Option<AudioRecord>> {
        let Some(current) = self.records.find_by_url(current_url).await? else {
            return Ok(None);
        };

        match self
            .records
            .prev_before(current.play_order, &current.url)
            .await?
        {
            Some(record) => Ok(Some(record)),
            None => Ok(self.records.last().await?),
        }
    }

    /// The record with the minimal order among non-folder records.
    pub async fn first(&self) -> Result<Option<AudioRecord>> {
        Ok(self.records.first().await?)
    }

    /// The record with the maximal order among non-folder records.
    pub async fn last(&self) -> Result<Option<AudioRecord>> {
        Ok(self.records.last().await?)
    }
}
