use crate::config::TrackerConfig;
use crate::events::EventBroadcaster;
use crate::guard::OperationGuard;
use once_cell::sync::Lazy;
use operation_tracker_types::{
    CategoryFlags, OperationCategory, OperationState, TrackedOperation, TrackerEvent,
    TrackerSnapshot,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strum::EnumCount;
use tokio::sync::mpsc;

static GLOBAL_TRACKER: Lazy<Arc<OperationTracker>> =
    Lazy::new(|| Arc::new(OperationTracker::new(Arc::new(EventBroadcaster::new()))));

/// Process-wide tracker for callers that don't hold their own instance
pub fn global() -> Arc<OperationTracker> {
    GLOBAL_TRACKER.clone()
}

/// Registry entries plus a running count per category.
///
/// Both live under one lock so `counts[c]` always equals the number of
/// entries whose category is `c`.
#[derive(Default)]
struct Registry {
    entries: HashMap<String, OperationState>,
    counts: [usize; OperationCategory::COUNT],
}

impl Registry {
    fn flags(&self) -> CategoryFlags {
        CategoryFlags::from_counts(&self.counts)
    }
}

/// Tracks in-flight operations by caller-chosen key.
///
/// Presence of a key *is* the "in progress" signal: `start` registers,
/// `stop` removes, nothing expires on its own. Every mutation that changes
/// the registry publishes one `TrackerEvent` carrying the aggregate flags
/// as of that mutation.
pub struct OperationTracker {
    registry: RwLock<Registry>,
    broadcaster: Arc<EventBroadcaster>,
    /// Guards held longer than this log a warning on release
    hold_warning: Duration,
}

impl OperationTracker {
    pub fn new(broadcaster: Arc<EventBroadcaster>) -> Self {
        Self::with_config(&TrackerConfig::default(), broadcaster)
    }

    pub fn with_config(config: &TrackerConfig, broadcaster: Arc<EventBroadcaster>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            broadcaster,
            hold_warning: config.long_running_threshold(),
        }
    }

    /// Register (or re-register) an operation.
    ///
    /// Replacing an existing key resets its progress and message and may
    /// move it to another category.
    pub fn start(&self, key: impl Into<String>, category: OperationCategory, message: Option<&str>) {
        let key = key.into();
        let state = OperationState::new(category, message.map(|m| m.to_string()));

        let mut registry = self.registry.write();
        if let Some(previous) = registry.entries.insert(key.clone(), state.clone()) {
            registry.counts[previous.category.index()] -= 1;
        }
        registry.counts[category.index()] += 1;

        log::debug!(
            "[OPERATION_TRACKER] Started '{}' ({}){}",
            key,
            category,
            message.map(|m| format!(": {}", m)).unwrap_or_default()
        );

        self.broadcaster.broadcast(TrackerEvent::Started {
            key,
            state,
            flags: registry.flags(),
        });
    }

    /// Register an operation in the default (loading) category
    pub fn start_loading(&self, key: impl Into<String>) {
        self.start(key, OperationCategory::default(), None);
    }

    /// Remove an operation. Absent keys are ignored.
    pub fn stop(&self, key: &str) {
        let mut registry = self.registry.write();
        let Some(previous) = registry.entries.remove(key) else {
            return;
        };
        registry.counts[previous.category.index()] -= 1;

        log::debug!(
            "[OPERATION_TRACKER] Stopped '{}' ({}) at {}%",
            key,
            previous.category,
            previous.progress
        );

        self.broadcaster.broadcast(TrackerEvent::Stopped {
            key: key.to_string(),
            category: previous.category,
            flags: registry.flags(),
        });
    }

    /// Replace the progress of a registered operation.
    ///
    /// The value is stored as given. Absent keys are ignored so a late
    /// progress report racing a `stop` can't resurrect the entry.
    pub fn update_progress(&self, key: &str, progress: i32) {
        let mut registry = self.registry.write();
        let Some(state) = registry.entries.get_mut(key) else {
            return;
        };
        state.progress = progress;

        self.broadcaster.broadcast(TrackerEvent::ProgressUpdated {
            key: key.to_string(),
            progress,
            flags: registry.flags(),
        });
    }

    pub fn get_state(&self, key: &str) -> Option<OperationState> {
        self.registry.read().entries.get(key).cloned()
    }

    pub fn is_active(&self, category: OperationCategory) -> bool {
        self.registry.read().counts[category.index()] > 0
    }

    pub fn is_loading(&self) -> bool {
        self.is_active(OperationCategory::Loading)
    }

    pub fn is_saving(&self) -> bool {
        self.is_active(OperationCategory::Saving)
    }

    pub fn is_deleting(&self) -> bool {
        self.is_active(OperationCategory::Deleting)
    }

    pub fn is_uploading(&self) -> bool {
        self.is_active(OperationCategory::Uploading)
    }

    pub fn is_downloading(&self) -> bool {
        self.is_active(OperationCategory::Downloading)
    }

    /// All five aggregate flags read under a single lock
    pub fn flags(&self) -> CategoryFlags {
        self.registry.read().flags()
    }

    pub fn len(&self) -> usize {
        self.registry.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().entries.is_empty()
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.registry.read().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Consistent copy of every entry and the aggregate flags
    pub fn snapshot(&self) -> TrackerSnapshot {
        let registry = self.registry.read();
        let mut operations: Vec<TrackedOperation> = registry
            .entries
            .iter()
            .map(|(key, state)| TrackedOperation {
                key: key.clone(),
                state: state.clone(),
            })
            .collect();
        operations.sort_by(|a, b| a.key.cmp(&b.key));

        TrackerSnapshot {
            operations,
            flags: registry.flags(),
        }
    }

    /// Entries registered at least `threshold` ago, sorted by key.
    ///
    /// Reporting only: long-running entries are never removed here.
    pub fn long_running(&self, threshold: Duration) -> Vec<TrackedOperation> {
        let mut operations: Vec<TrackedOperation> = self
            .registry
            .read()
            .entries
            .iter()
            .filter(|(_, state)| state.age() >= threshold)
            .map(|(key, state)| TrackedOperation {
                key: key.clone(),
                state: state.clone(),
            })
            .collect();
        operations.sort_by(|a, b| a.key.cmp(&b.key));
        operations
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> (String, mpsc::Receiver<TrackerEvent>) {
        self.broadcaster.subscribe()
    }

    pub fn unsubscribe(&self, subscriber_id: &str) {
        self.broadcaster.unsubscribe(subscriber_id)
    }

    pub fn broadcaster(&self) -> Arc<EventBroadcaster> {
        self.broadcaster.clone()
    }

    pub(crate) fn hold_warning(&self) -> Duration {
        self.hold_warning
    }

    /// Start an operation and return a guard that stops it when dropped
    pub fn guard(
        self: &Arc<Self>,
        key: impl Into<String>,
        category: OperationCategory,
        message: Option<&str>,
    ) -> OperationGuard {
        let key = key.into();
        self.start(key.clone(), category, message);
        OperationGuard::new(Arc::clone(self), key)
    }

    /// Run `future` as a tracked operation.
    ///
    /// The key is stopped however the future ends: completion, an `Err`
    /// output, a panic, or the returned future being dropped.
    pub async fn track<F, T>(
        self: &Arc<Self>,
        key: impl Into<String>,
        category: OperationCategory,
        message: Option<&str>,
        future: F,
    ) -> T
    where
        F: Future<Output = T>,
    {
        let guard = self.guard(key, category, message);
        let output = future.await;
        guard.finish();
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn create_test_tracker() -> OperationTracker {
        OperationTracker::new(Arc::new(EventBroadcaster::new()))
    }

    /// Recompute the aggregates by scanning every entry
    fn folded_flags(tracker: &OperationTracker) -> CategoryFlags {
        let snapshot = tracker.snapshot();
        let mut counts = [0usize; OperationCategory::COUNT];
        for op in &snapshot.operations {
            counts[op.state.category.index()] += 1;
        }
        CategoryFlags::from_counts(&counts)
    }

    #[test]
    fn test_unknown_key_is_absent() {
        let tracker = create_test_tracker();
        assert!(tracker.get_state("never-started").is_none());
        assert!(!tracker.flags().any());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_start_registers_state() {
        let tracker = create_test_tracker();
        tracker.start("save-42", OperationCategory::Saving, Some("Saving record 42"));

        let state = tracker.get_state("save-42").unwrap();
        assert_eq!(state.category, OperationCategory::Saving);
        assert!(state.active);
        assert_eq!(state.message.as_deref(), Some("Saving record 42"));
        assert_eq!(state.progress, 0);
        assert!(tracker.is_saving());
        assert!(!tracker.is_loading());
    }

    #[test]
    fn test_start_loading_uses_default_category() {
        let tracker = create_test_tracker();
        tracker.start_loading("students");

        let state = tracker.get_state("students").unwrap();
        assert_eq!(state.category, OperationCategory::Loading);
        assert!(state.message.is_none());
        assert!(tracker.is_loading());
    }

    #[test]
    fn test_start_then_stop() {
        let tracker = create_test_tracker();
        tracker.start("delete-3", OperationCategory::Deleting, None);
        tracker.stop("delete-3");

        assert!(tracker.get_state("delete-3").is_none());
        assert!(!tracker.is_deleting());
    }

    #[test]
    fn test_restart_replaces_entry_and_moves_category() {
        let tracker = create_test_tracker();
        tracker.start("file-9", OperationCategory::Uploading, Some("first"));
        tracker.update_progress("file-9", 80);

        tracker.start("file-9", OperationCategory::Downloading, None);

        let state = tracker.get_state("file-9").unwrap();
        assert_eq!(state.category, OperationCategory::Downloading);
        assert_eq!(state.progress, 0);
        assert!(state.message.is_none());
        assert!(!tracker.is_uploading());
        assert!(tracker.is_downloading());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_update_progress_leaves_other_fields() {
        let tracker = create_test_tracker();
        tracker.start("upload-7", OperationCategory::Uploading, Some("Uploading avatar"));
        tracker.update_progress("upload-7", 40);

        let state = tracker.get_state("upload-7").unwrap();
        assert_eq!(state.progress, 40);
        assert_eq!(state.category, OperationCategory::Uploading);
        assert_eq!(state.message.as_deref(), Some("Uploading avatar"));
    }

    #[test]
    fn test_update_progress_on_absent_key_is_noop() {
        let tracker = create_test_tracker();
        tracker.update_progress("ghost", 50);
        assert!(tracker.get_state("ghost").is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_out_of_range_progress_is_stored_as_given() {
        let tracker = create_test_tracker();
        tracker.start("export", OperationCategory::Downloading, None);

        tracker.update_progress("export", 150);
        let state = tracker.get_state("export").unwrap();
        assert_eq!(state.progress, 150);
        assert_eq!(state.clamped_progress(), 100);

        tracker.update_progress("export", -1);
        assert_eq!(tracker.get_state("export").unwrap().progress, -1);
    }

    #[test]
    fn test_last_stop_clears_category() {
        let tracker = create_test_tracker();
        tracker.start("save-1", OperationCategory::Saving, None);
        tracker.start("save-2", OperationCategory::Saving, None);

        tracker.stop("save-1");
        assert!(tracker.is_saving());

        tracker.stop("save-2");
        assert!(!tracker.is_saving());
    }

    #[test]
    fn test_double_stop_is_idempotent() {
        let tracker = create_test_tracker();
        let (_, mut rx) = tracker.subscribe();
        tracker.start("delete-5", OperationCategory::Deleting, None);
        tracker.start("load-1", OperationCategory::Loading, None);

        tracker.stop("delete-5");
        let after_first = tracker.snapshot();
        tracker.stop("delete-5");
        let after_second = tracker.snapshot();

        assert_eq!(after_first.operations, after_second.operations);
        assert_eq!(after_first.flags, after_second.flags);

        // started, started, stopped; the second stop publishes nothing
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event.name());
        }
        assert_eq!(
            events,
            vec!["operation.started", "operation.started", "operation.stopped"]
        );
    }

    #[test]
    fn test_concrete_scenario() {
        let tracker = create_test_tracker();

        tracker.start("save-42", OperationCategory::Saving, Some("Saving record 42"));
        assert!(tracker.is_saving());

        tracker.update_progress("save-42", 55);
        assert_eq!(tracker.get_state("save-42").unwrap().progress, 55);

        tracker.start("upload-7", OperationCategory::Uploading, None);
        assert!(tracker.is_saving() && tracker.is_uploading());

        tracker.stop("save-42");
        assert!(!tracker.is_saving() && tracker.is_uploading());

        tracker.stop("upload-7");
        assert!(!tracker.is_saving() && !tracker.is_uploading());
    }

    #[test]
    fn test_counts_match_full_scan() {
        let tracker = create_test_tracker();
        let steps: Vec<(&str, Option<OperationCategory>)> = vec![
            ("a", Some(OperationCategory::Loading)),
            ("b", Some(OperationCategory::Saving)),
            ("a", Some(OperationCategory::Saving)),
            ("c", Some(OperationCategory::Downloading)),
            ("b", None),
            ("missing", None),
            ("a", None),
            ("d", Some(OperationCategory::Deleting)),
        ];

        for (key, step) in steps {
            match step {
                Some(category) => tracker.start(key, category, None),
                None => tracker.stop(key),
            }
            assert_eq!(tracker.flags(), folded_flags(&tracker));
            for category in OperationCategory::iter() {
                assert_eq!(tracker.is_active(category), tracker.flags().get(category));
            }
        }
    }

    #[test]
    fn test_events_carry_flags_at_mutation_time() {
        let tracker = create_test_tracker();
        let (_, mut rx) = tracker.subscribe();

        tracker.start("save-42", OperationCategory::Saving, Some("Saving record 42"));
        tracker.update_progress("save-42", 55);
        tracker.start("upload-7", OperationCategory::Uploading, None);
        tracker.stop("save-42");

        match rx.try_recv().unwrap() {
            TrackerEvent::Started { key, state, flags } => {
                assert_eq!(key, "save-42");
                assert_eq!(state.category, OperationCategory::Saving);
                assert!(flags.saving && !flags.uploading);
            }
            other => panic!("unexpected event {:?}", other),
        }
        match rx.try_recv().unwrap() {
            TrackerEvent::ProgressUpdated { progress, .. } => assert_eq!(progress, 55),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().unwrap().flags().uploading);
        match rx.try_recv().unwrap() {
            TrackerEvent::Stopped { key, category, flags } => {
                assert_eq!(key, "save-42");
                assert_eq!(category, OperationCategory::Saving);
                assert!(!flags.saving && flags.uploading);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_noop_mutations_publish_nothing() {
        let tracker = create_test_tracker();
        let (_, mut rx) = tracker.subscribe();

        tracker.stop("absent");
        tracker.update_progress("absent", 10);

        assert!(rx.try_recv().is_err());
        assert!(tracker.broadcaster().recent_events().is_empty());
    }

    #[test]
    fn test_snapshot_sorted() {
        let tracker = create_test_tracker();
        tracker.start("b", OperationCategory::Saving, None);
        tracker.start("a", OperationCategory::Loading, None);

        let snapshot = tracker.snapshot();
        let keys: Vec<&str> = snapshot.operations.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(snapshot.flags.loading && snapshot.flags.saving);
        assert_eq!(tracker.keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_long_running_reports_without_removing() {
        let tracker = create_test_tracker();
        tracker.start("upload-big", OperationCategory::Uploading, None);

        assert!(tracker.long_running(Duration::from_secs(3600)).is_empty());

        let reported = tracker.long_running(Duration::ZERO);
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].key, "upload-big");
        assert!(tracker.is_uploading());
    }

    #[test]
    fn test_long_running_with_maximum_threshold() {
        let tracker = create_test_tracker();
        tracker.start("fresh", OperationCategory::Uploading, None);

        assert!(tracker.long_running(Duration::from_secs(u64::MAX)).is_empty());

        let config = TrackerConfig::from_lookup(|name: &str| {
            (name == "TRACKER_LONG_RUNNING_SECS").then(|| u64::MAX.to_string())
        })
        .unwrap();
        assert!(tracker.long_running(config.long_running_threshold()).is_empty());
        assert!(tracker.is_uploading());
    }

    #[test]
    fn test_concurrent_mutations_keep_counts_consistent() {
        let tracker = Arc::new(create_test_tracker());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("w{}-{}", worker, i % 10);
                        let category = if i % 2 == 0 {
                            OperationCategory::Saving
                        } else {
                            OperationCategory::Loading
                        };
                        tracker.start(key.clone(), category, None);
                        tracker.update_progress(&key, i);
                        if i % 3 == 0 {
                            tracker.stop(&key);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.flags(), folded_flags(&tracker));
    }

    #[test]
    fn test_global_tracker_is_shared() {
        let key = "global-test-key";
        global().start(key, OperationCategory::Downloading, None);
        assert!(global().get_state(key).is_some());
        global().stop(key);
        assert!(global().get_state(key).is_none());
    }
}
