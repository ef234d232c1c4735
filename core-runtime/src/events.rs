//! # Event Bus System
//!
//! Progress and lifecycle events for catalog batches, published through
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: [`BatchEvent`] for scheduler runs, [`UploadEvent`] for uploads
//! - **EventBus**: Central broadcast channel for publishing events
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   emit    ┌───────────┐
//! │ WorkScheduler ├──────────>│           │   subscribe   ┌────────────┐
//! └───────────────┘           │ EventBus  ├──────────────>│ Subscriber │
//! ┌───────────────┐   emit    │ (broadcast│               └────────────┘
//! │ Upload        ├──────────>│  channel) │
//! └───────────────┘           └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{BatchEvent, CoreEvent, EventBus};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Batch(BatchEvent::Started {
//!         batch_id: "b-1".to_string(),
//!         operation: "sync-meta".to_string(),
//!         total: 12,
//!     }))
//!     .ok();
//! ```
//!
//! Emitting without subscribers returns an error that callers ignore with
//! `.ok()`; progress reporting never fails an operation.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{self, error::SendError, Receiver};

/// Default buffer size for the event bus.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Scheduler batch events
    Batch(BatchEvent),
    /// Upload pipeline events
    Upload(UploadEvent),
}

// ============================================================================
// Batch Events
// ============================================================================

/// Phase of a scheduler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchPhase {
    /// Workers visiting files and queueing actions
    Visit,
    /// Workers executing queued actions
    Execute,
}

/// Events emitted by a scheduler run over a set of files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum BatchEvent {
    /// Run started.
    Started {
        batch_id: String,
        /// Operation name, e.g. "convert" or "sync-meta".
        operation: String,
        /// Number of files in the run.
        total: usize,
    },
    /// A file or action finished.
    Progress {
        batch_id: String,
        /// Work items finished so far. Never decreases within a run.
        processed: usize,
        /// Total work items.
        total: usize,
        /// Progress percentage (0-100).
        percent: u8,
        phase: BatchPhase,
    },
    /// Run finished successfully.
    Completed {
        batch_id: String,
        processed: usize,
        /// Actions executed in the second phase.
        actions: usize,
        duration_secs: f64,
    },
    /// Run stopped on the first error.
    Failed {
        batch_id: String,
        message: String,
        processed: usize,
    },
    /// Run stopped on caller cancellation.
    Cancelled { batch_id: String, processed: usize },
}

/// Percentage of `processed` over `total`, clamped to 100.
pub fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((processed.min(total) * 100) / total) as u8
}

// ============================================================================
// Upload Events
// ============================================================================

/// Events emitted while uploading to the photo service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum UploadEvent {
    /// An upload token was obtained for one more file.
    Progress { uploaded: usize, total: usize },
    /// A batch of tokens was committed as media items.
    BatchCommitted { items: usize },
    /// All batches committed.
    Completed { items: usize },
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Slow subscribers that fall behind more than the buffer size receive
/// `RecvError::Lagged` and skip ahead.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
