//! # Event Bus System
//!
//! Typed, broadcast-based notifications from the library engine to the
//! presentation layer, built on `tokio::sync::broadcast`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ Migration Orchestr.  ├────────>│           ├────────────>│ UI / host  │
//! └──────────────────────┘         │ EventBus  │             └────────────┘
//! ┌──────────────────────┐  emit   │           │  subscribe  ┌────────────┐
//! │ Sync Coordinator     ├────────>│           ├────────────>│ Player     │
//! └──────────────────────┘         └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
//!
//! let event_bus = EventBus::new(32);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Library(LibraryEvent::LastBookReloadRequested {
//!         relative_path: "Fantasy/book.m4b".to_string(),
//!     }))
//!     .ok();
//!
//! assert!(subscriber.try_recv().is_ok());
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; it can keep
//!   receiving.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.
//!
//! Emitting with no subscribers is not an error worth surfacing; producers
//! call `.ok()` on the result.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Store schema migration and loading
    Migration(MigrationEvent),
    /// Catalog synchronization runs
    Sync(SyncEvent),
    /// Library-level changes the player has to react to
    Library(LibraryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Migration(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Migration(MigrationEvent::StepFailed { .. })
            | CoreEvent::Migration(MigrationEvent::StoreLoadFailed { .. })
            | CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::Cancelled { .. }) => EventSeverity::Warning,
            CoreEvent::Migration(MigrationEvent::StoreLoaded { .. })
            | CoreEvent::Sync(SyncEvent::Completed { .. })
            | CoreEvent::Library(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Migration Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum MigrationEvent {
    /// A migration step is about to run.
    StepStarted {
        step_id: String,
        from_version: u32,
        to_version: u32,
    },
    /// A step committed and the store advanced to `version`.
    StepApplied { step_id: String, version: u32 },
    /// A step rolled back; the store is still at its previous version.
    StepFailed { step_id: String, message: String },
    /// The store is at the latest version and open for catalog access.
    StoreLoaded {
        version: u32,
        /// Steps applied during this load, in order
        steps_applied: Vec<String>,
    },
    /// Loading failed before the store became ready.
    StoreLoadFailed { message: String },
    /// The store files were deleted so the next launch starts empty.
    StoreReset { path: String },
}

impl MigrationEvent {
    fn description(&self) -> &str {
        match self {
            MigrationEvent::StepStarted { .. } => "Migration step started",
            MigrationEvent::StepApplied { .. } => "Migration step applied",
            MigrationEvent::StepFailed { .. } => "Migration step failed",
            MigrationEvent::StoreLoaded { .. } => "Store loaded",
            MigrationEvent::StoreLoadFailed { .. } => "Failed to load store",
            MigrationEvent::StoreReset { .. } => "Store files removed",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    Started {
        sync_id: String,
        /// Whether this run fetches the whole library
        is_full_sync: bool,
        /// Folder being synced; `None` is the top level
        scope: Option<String>,
    },
    Completed {
        sync_id: String,
        items_inserted: u64,
        items_updated: u64,
        items_deleted: u64,
        /// Local-only items kept because their progress is newer than the snapshot
        items_deferred: u64,
        duration_ms: u64,
    },
    Failed {
        sync_id: String,
        message: String,
        /// Whether retrying later can succeed
        recoverable: bool,
    },
    Cancelled { sync_id: String },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Completed { .. } => "Sync completed successfully",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// The remote last-played item was not in the local library before the
    /// sync; the player should reload it.
    LastBookReloadRequested { relative_path: String },
    /// The remote last-played item already existed locally but differs from
    /// the local pointer.
    LastBookChanged { relative_path: String },
    /// The persisted full-sync flag was cleared by the user.
    FullSyncReset,
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::LastBookReloadRequested { .. } => "Last played book must be reloaded",
            LibraryEvent::LastBookChanged { .. } => "Last played book changed remotely",
            LibraryEvent::FullSyncReset => "Full library sync reset",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`CoreEvent`]s. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus; subscribers lagging more than `capacity`
    /// events behind receive `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event; returns the number of subscribers reached.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Each call creates an independent receiver of all future events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

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

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(16);
/// let library_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Library(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing
    /// matching is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn reload(path: &str) -> CoreEvent {
        CoreEvent::Library(LibraryEvent::LastBookReloadRequested {
            relative_path: path.to_string(),
        })
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(4);
        assert!(bus.emit(reload("a.m4b")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(4);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.emit(reload("a.m4b")).unwrap(), 2);
        assert_eq!(first.recv().await.unwrap(), reload("a.m4b"));
        assert_eq!(second.recv().await.unwrap(), reload("a.m4b"));
    }

    #[tokio::test]
    async fn test_event_stream_filter_skips_other_domains() {
        let bus = EventBus::new(8);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Library(_)));

        bus.emit(CoreEvent::Sync(SyncEvent::Cancelled {
            sync_id: "s1".to_string(),
        }))
        .unwrap();
        bus.emit(reload("b.m4b")).unwrap();

        assert_eq!(stream.recv().await.unwrap(), reload("b.m4b"));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut stream = EventStream::new(bus.subscribe());

        for i in 0..5 {
            bus.emit(reload(&format!("{}.m4b", i))).unwrap();
        }

        assert!(matches!(stream.try_recv(), Some(Err(RecvError::Lagged(_)))));
        assert!(matches!(stream.try_recv(), Some(Ok(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Migration(MigrationEvent::StepFailed {
            step_id: "0002_library_state".to_string(),
            message: "disk full".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let started = CoreEvent::Migration(MigrationEvent::StepStarted {
            step_id: "0001_create_catalog".to_string(),
            from_version: 0,
            to_version: 1,
        });
        assert_eq!(started.severity(), EventSeverity::Debug);
        assert_eq!(reload("a").severity(), EventSeverity::Info);
        assert_eq!(
            CoreEvent::Sync(SyncEvent::Cancelled {
                sync_id: "s".to_string()
            })
            .severity(),
            EventSeverity::Warning
        );
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = CoreEvent::Library(LibraryEvent::LastBookChanged {
            relative_path: "Sci-Fi/dune.m4b".to_string(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Library");
        assert_eq!(json["payload"]["event"], "LastBookChanged");
        assert_eq!(json["payload"]["relative_path"], "Sci-Fi/dune.m4b");

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.description(), "Last played book changed remotely");
    }
}
