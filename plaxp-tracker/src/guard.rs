use crate::tracker::OperationTracker;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// RAII guard that stops its operation when dropped.
///
/// Obtained from `OperationTracker::guard`. Whatever path the owning code
/// takes out of scope (early return, `?`, panic unwind, cancelled future),
/// the key is removed from the registry exactly once.
pub struct OperationGuard {
    tracker: Arc<OperationTracker>,
    key: String,
    acquired_at: Instant,
    released: bool,
}

impl OperationGuard {
    pub(crate) fn new(tracker: Arc<OperationTracker>, key: String) -> Self {
        Self {
            tracker,
            key,
            acquired_at: Instant::now(),
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// How long this guard has been held
    pub fn held_duration(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn set_progress(&self, progress: i32) {
        self.tracker.update_progress(&self.key, progress);
    }

    /// Stop the operation now rather than at end of scope
    pub fn finish(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let held = self.held_duration();
        if held >= self.tracker.hold_warning() {
            log::warn!(
                "[OPERATION_TRACKER] Operation '{}' held for {} seconds (unusually long)",
                self.key,
                held.as_secs()
            );
        }

        self.tracker.stop(&self.key);
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.release();
    }
}
