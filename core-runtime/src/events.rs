//! # Event Bus System
//!
//! Decoupled communication between catalog modules and the presentation
//! layer through typed events over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies per domain
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! Events are fire-and-forget notifications; no response is awaited by the
//! core. Presentation code is responsible for marshaling received events
//! onto its own main/UI thread before touching view state.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, CoreEvent, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Syncing { current: 0, total: 42 }))
//!     .ok();
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = stream.recv().await {
//!         println!("Received: {:?}", event);
//!     }
//! });
//! # }
//! ```
//!
//! ## Error Handling
//!
//! `tokio::sync::broadcast` produces two receive errors:
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Non-fatal;
//!   it can keep receiving new events.
//! - **`RecvError::Closed`**: all senders dropped; treat as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Balances memory usage against burst tolerance. Subscribers that can't
/// keep up receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
///
/// This is the main event type published and received through the event
/// bus. It wraps domain-specific event types for the individual modules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Reconciliation-related events
    Sync(SyncEvent),
    /// Catalog content events
    Library(LibraryEvent),
    /// Ordering pass events
    Sort(SortEvent),
    /// File download events
    Download(DownloadEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
            CoreEvent::Sort(e) => e.description(),
            CoreEvent::Download(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::Synced { .. }) => EventSeverity::Info,
            CoreEvent::Sort(SortEvent::Done) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events emitted while reconciling the catalog against a disk snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A reconciliation pass is in progress.
    Syncing {
        /// Number of snapshot entries processed so far.
        current: u64,
        /// Total entries in the snapshot being reconciled.
        total: u64,
    },
    /// A reconciliation pass committed.
    Synced {
        /// Records inserted by this pass.
        added: u64,
        /// Records whose mutable fields changed.
        updated: u64,
        /// Records deleted because their file vanished.
        removed: u64,
    },
    /// A reconciliation pass was abandoned.
    Failed {
        /// Human-readable error message.
        message: String,
        /// Whether the next watcher event will naturally retry.
        recoverable: bool,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Syncing { .. } => "Catalog sync in progress",
            SyncEvent::Synced { .. } => "Catalog sync completed",
            SyncEvent::Failed { .. } => "Catalog sync failed",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

/// Events related to catalog content changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// Records were removed from the catalog.
    Deleted {
        /// URLs of the removed records.
        urls: Vec<String>,
    },
    /// One or more records changed in place (hash, liked flag, play count,
    /// sticky promotion, cover flag). Consumers re-query what they show.
    Updated,
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::Deleted { .. } => "Records removed from catalog",
            LibraryEvent::Updated => "Catalog records updated",
        }
    }
}

// ============================================================================
// Sort Events
// ============================================================================

/// Events bracketing an ordering pass so the UI can show a busy state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum SortEvent {
    /// An ordering pass started.
    Started {
        /// The ordering mode being applied ("sequential" or "random").
        mode: String,
    },
    /// The ordering pass committed.
    Done,
}

impl SortEvent {
    fn description(&self) -> &str {
        match self {
            SortEvent::Started { .. } => "Ordering pass started",
            SortEvent::Done => "Ordering pass completed",
        }
    }
}

// ============================================================================
// Download Events
// ============================================================================

/// Events related to placeholder materialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// Download progress changed for a file.
    Progress {
        /// URL of the file being downloaded.
        url: String,
        /// Progress percentage, 0-100.
        percent: u8,
    },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Progress { .. } => "Download progress changed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned per subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events buffered per subscriber.
    ///   When a subscriber falls behind by more than this amount it
    ///   receives a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error when there are no active subscribers. Emission sites treat
    /// the error as ignorable (`.ok()`) since events are fire-and-forget.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that observes all future
    /// events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream, CoreEvent};
///
/// let event_bus = EventBus::new(100);
/// let sync_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Sync(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    ///
    /// Only events that match the filter are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n`
    /// events, `RecvError::Closed` if all senders were dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            match &self.filter {
                Some(predicate) if !predicate(&event) => continue,
                _ => return Ok(event),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let event = CoreEvent::Sync(SyncEvent::Syncing {
            current: 1,
            total: 10,
        });
        bus.emit(event.clone()).unwrap();

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(CoreEvent::Library(LibraryEvent::Updated)).unwrap();

        assert_eq!(
            rx1.recv().await.unwrap(),
            CoreEvent::Library(LibraryEvent::Updated)
        );
        assert_eq!(
            rx2.recv().await.unwrap(),
            CoreEvent::Library(LibraryEvent::Updated)
        );
    }

    #[test]
    fn test_emit_without_subscribers_errors() {
        let bus = EventBus::new(16);
        assert!(bus.emit(CoreEvent::Library(LibraryEvent::Updated)).is_err());
    }

    #[test]
    fn test_severity_mapping() {
        let failed = CoreEvent::Sync(SyncEvent::Failed {
            message: "disk vanished".to_string(),
            recoverable: true,
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let synced = CoreEvent::Sync(SyncEvent::Synced {
            added: 1,
            updated: 0,
            removed: 0,
        });
        assert_eq!(synced.severity(), EventSeverity::Info);

        let progress = CoreEvent::Download(DownloadEvent::Progress {
            url: "/library/a.mp3".to_string(),
            percent: 50,
        });
        assert_eq!(progress.severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_descriptions() {
        let event = CoreEvent::Sort(SortEvent::Started {
            mode: "random".to_string(),
        });
        assert_eq!(event.description(), "Ordering pass started");
    }

    #[tokio::test]
    async fn test_filtered_stream_skips_non_matching() {
        let bus = EventBus::new(16);
        let mut stream =
            EventStream::new(bus.subscribe()).filter(|e| matches!(e, CoreEvent::Sort(_)));

        bus.emit(CoreEvent::Library(LibraryEvent::Updated)).unwrap();
        bus.emit(CoreEvent::Sort(SortEvent::Done)).unwrap();

        assert_eq!(stream.recv().await.unwrap(), CoreEvent::Sort(SortEvent::Done));
    }

    #[test]
    fn test_serde_round_trip() {
        let event = CoreEvent::Sync(SyncEvent::Synced {
            added: 3,
            updated: 1,
            removed: 2,
        });
        let json = serde_json::to_string(&event).unwrap();
        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
