//! # Event Bus System
//!
//! Typed progress events broadcast from the sync core to whichever
//! front-end is attached (CLI progress output, a GUI status pane, a
//! virtual-drive daemon).
//!
//! ```text
//! ┌──────────────────────┐   emit   ┌──────────┐  subscribe  ┌────────────┐
//! │ ReconciliationEngine ├─────────>│ EventBus ├────────────>│ Front-end  │
//! └──────────────────────┘          └──────────┘             └────────────┘
//! ```
//!
//! Emitting never blocks. With no subscribers `emit` returns an error that
//! publishers ignore. Slow subscribers get `RecvError::Lagged` and may keep
//! reading.
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, FilePhase, SyncEvent};
//!
//! # core_async::runtime::block_on(async {
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::FileProgress {
//!     filename: "a.mp3".to_string(),
//!     phase: FilePhase::Downloading,
//! }))
//! .ok();
//!
//! assert!(matches!(rx.recv().await, Ok(CoreEvent::Sync(_))));
//! # });
//! ```

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Top-level event published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Sync(SyncEvent),
    Catalog(CatalogEvent),
    Replica(ReplicaEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Catalog(e) => e.description(),
            CoreEvent::Replica(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Catalog(CatalogEvent::Unreachable { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::FileProgress {
                phase: FilePhase::Failed { .. },
                ..
            }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Cancelled { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Catalog(CatalogEvent::Uploaded { .. }) => EventSeverity::Info,
            CoreEvent::Replica(_) => EventSeverity::Info,
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

/// Where a single song is in the sync pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "phase")]
pub enum FilePhase {
    /// Bytes are being streamed into the staging cache.
    Downloading,
    /// A retry is scheduled after a failed attempt.
    Retrying { attempt: u32 },
    /// Fully staged; about to become visible.
    Staged { bytes: u64 },
    /// Visible in the music directory and recorded in the manifest.
    Promoted { bytes: u64 },
    /// Promoted from a retained cache copy without downloading.
    ReusedFromCache { bytes: u64 },
    /// Gave up on this file for the current cycle.
    Failed { reason: String },
    Removing,
    Removed,
}

/// Events emitted by one reconciliation cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A cycle has computed its plan and is about to touch the replica.
    Started {
        root: String,
        to_add: u64,
        to_remove: u64,
    },
    FileProgress {
        filename: String,
        phase: FilePhase,
    },
    /// The cycle ran to the end, possibly with per-file failures.
    Completed {
        added: u64,
        removed: u64,
        failed: u64,
        duration_ms: u64,
    },
    /// The cycle aborted before completing.
    Failed { message: String },
    /// The cycle stopped early at the caller's request.
    Cancelled { added: u64, removed: u64 },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::FileProgress { .. } => "Sync in progress",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
        }
    }
}

/// Events about the remote catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CatalogEvent {
    Fetched { song_count: u64 },
    Unreachable { message: String },
    Uploaded {
        filename: String,
        song_count: u64,
        remaining: Option<u64>,
    },
}

impl CatalogEvent {
    fn description(&self) -> &str {
        match self {
            CatalogEvent::Fetched { .. } => "Catalog fetched",
            CatalogEvent::Unreachable { .. } => "Catalog unreachable",
            CatalogEvent::Uploaded { .. } => "Song uploaded",
        }
    }
}

/// Events about local replica maintenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ReplicaEvent {
    Initialized { root: String },
    SongPlayed { filename: String },
    CacheCleared { files: u64, bytes: u64 },
}

impl ReplicaEvent {
    fn description(&self) -> &str {
        match self {
            ReplicaEvent::Initialized { .. } => "Replica initialized",
            ReplicaEvent::SongPlayed { .. } => "Song marked as played",
            ReplicaEvent::CacheCleared { .. } => "Cache cleared",
        }
    }
}

/// Central broadcast channel for [`CoreEvent`]s.
///
/// Cheap to clone; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers reached, or an error when nobody
    /// is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a receiver for all future events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Convenience for `EventStream::new(self.subscribe())`.
    pub fn stream(&self) -> EventStream {
        EventStream::new(self.subscribe())
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

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A receiver with an optional predicate applied to every event.
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

    /// Only events matching `predicate` are returned by `recv`/`try_recv`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Receives the next matching event.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once every sender is gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(Ok(event)),
                Ok(_) => continue,
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
