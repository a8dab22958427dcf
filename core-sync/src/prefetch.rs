//! # Prefetch Service
//!
//! Best-effort readahead: walks the active ordering from the playback
//! cursor and asks the disk watcher to materialize the next few
//! placeholder files, so continuous playback does not stall on cloud
//! downloads. Requests are fire-and-forget; a failed download request is
//! logged and never propagated.

use bridge_traits::disk::DiskWatcher;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::navigation::NavigationService;
use crate::scheduler::JobGuard;

/// Downloads records ahead of a cursor.
pub struct PrefetchService {
    navigation: NavigationService,
    disk: Arc<dyn DiskWatcher>,
}

impl PrefetchService {
    /// Create a new prefetch service.
    pub fn new(navigation: NavigationService, disk: Arc<dyn DiskWatcher>) -> Self {
        Self { navigation, disk }
    }

    /// Request downloads for up to `count` records after `from_url`.
    ///
    /// The walk follows [`NavigationService::next`] and stops early when
    /// the ordering wraps back onto itself, the catalog runs out, or the
    /// job is cancelled. Returns the number of download requests issued.
    #[instrument(skip(self, guard), fields(from = from_url, count))]
    pub async fn download_ahead(
        &self,
        from_url: &str,
        count: u32,
        guard: &JobGuard,
    ) -> Result<u32> {
        let mut requested = 0u32;
        let mut visited: HashSet<String> = HashSet::from([from_url.to_string()]);
        let mut cursor = from_url.to_string();

        for step in 0..count {
            if guard.is_cancelled() {
                break;
            }

            let Some(next) = self.navigation.next(&cursor).await? else {
                break;
            };

            if !visited.insert(next.url.clone()) {
                debug!("Ordering wrapped around, stopping prefetch walk");
                break;
            }

            if next.is_placeholder {
                let disk = Arc::clone(&self.disk);
                let url = next.url.clone();
                tokio::spawn(async move {
                    if let Err(error) = disk.download(&url).await {
                        warn!(url = %url, %error, "Prefetch download request failed");
                    }
                });
                requested += 1;
            }

            guard.log_progress(step as u64 + 1, count as u64, "prefetching");
            cursor = next.url;
        }

        info!(requested, "Prefetch walk finished");
        Ok(requested)
    }
}
