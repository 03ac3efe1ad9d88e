//! Slotcast - slot-based post queues for LinkedIn and Threads
//!
//! Posts are appended to a per-platform queue and assigned the next free
//! recurring time slot. A dispatch loop publishes them when due, attaching
//! a link preview when the post contains a URL.

pub mod config;
pub mod credentials;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod preview;
pub mod publishers;
pub mod scheduler;
pub mod service;
pub mod slots;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{ErrorKind, Result, SlotcastError};
pub use scheduler::{EnqueueRequest, QueueEdge};
pub use service::QueueService;
pub use slots::{NewSlot, Recurrence, SlotUpdate, TimeSlot};
pub use types::{Failure, Platform, PostEntry, PostStatus, PreviewDescriptor, PreviewHint};
