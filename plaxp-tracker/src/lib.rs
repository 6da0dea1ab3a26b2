//! In-memory tracker for named asynchronous operations.
//!
//! Widgets register an operation under a key (`start`), report progress
//! (`update_progress`) and remove it when done (`stop`). Anyone can read a
//! single key back or ask whether any operation of a category is in flight,
//! and observers can subscribe to change events instead of polling.
//!
//! `OperationGuard` and `OperationTracker::track` make the `stop` call
//! unconditional; `LeakWatchdog` reports entries that outlive their
//! expected lifetime without ever removing them.

pub mod config;
pub mod events;
pub mod guard;
pub mod tracker;
pub mod watchdog;

pub use config::{ConfigError, TrackerConfig};
pub use events::EventBroadcaster;
pub use guard::OperationGuard;
pub use tracker::{global, OperationTracker};
pub use watchdog::LeakWatchdog;

pub use operation_tracker_types::{
    CategoryFlags, OperationCategory, OperationState, TrackedOperation, TrackerEvent,
    TrackerSnapshot,
};
