//! Event system for queue activity
//!
//! An in-process event bus that lets other surfaces observe enqueues,
//! publish results and redistributions without polling the database.
//!
//! # Architecture
//!
//! The event bus uses `tokio::sync::broadcast` for multi-subscriber support.
//! Emitting never blocks: with no subscribers events are dropped, and a
//! lagging subscriber misses the oldest events rather than stalling the
//! dispatch loop.
//!
//! # Example
//!
//! ```no_run
//! use libslotcast::service::events::{Event, EventBus};
//! use libslotcast::Platform;
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::Published {
//!     entry_id: "abc123".to_string(),
//!     platform: Platform::Threads,
//!     post_id: "1789".to_string(),
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ErrorKind;
use crate::types::Platform;

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<Event>;

/// Event bus for distributing queue events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

impl EventBus {
    /// Create a new event bus
    ///
    /// `capacity` is how many events each subscriber can fall behind before
    /// the oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: Event) {
        // send() only fails when nobody is listening
        let _ = self.sender.send(event);
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Events emitted by the scheduler and the dispatch loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A post was added to a platform queue
    Enqueued {
        entry_id: String,
        platform: Platform,
        scheduled_at: i64,
        position: i64,
    },

    /// A publish attempt succeeded
    Published {
        entry_id: String,
        platform: Platform,
        /// Id assigned by the platform
        post_id: String,
    },

    /// A publish attempt failed; the entry stays Failed until re-queued
    Failed {
        entry_id: String,
        platform: Platform,
        kind: ErrorKind,
        message: String,
    },

    /// Pending entries of a platform were re-timed
    Redistributed { platform: Platform, pending: usize },

    /// Link preview enrichment failed and the post went out without one
    PreviewDegraded {
        entry_id: String,
        platform: Platform,
        reason: String,
    },

    /// An entry interrupted mid-publish was returned to its queue
    Recovered {
        entry_id: String,
        platform: Platform,
        attempt_count: i64,
    },
}
