//! Shared types for the operation tracker and the widgets that observe it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{AsRefStr, Display, EnumCount, EnumIter, EnumString};

// =====================================================
// Domain Types
// =====================================================

/// Kind of work an in-flight operation represents.
///
/// Purely a classification: the only behavioural difference between
/// categories is which aggregate flag an operation contributes to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    EnumCount,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OperationCategory {
    #[default]
    Loading,
    Saving,
    Deleting,
    Uploading,
    Downloading,
}

impl OperationCategory {
    /// Stable slot for per-category counters.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// State of one registered operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationState {
    pub category: OperationCategory,
    /// Always true while the entry is registered; completion is signalled by removal.
    pub active: bool,
    /// Optional human-readable label (e.g. "Saving record 42")
    pub message: Option<String>,
    /// Progress as reported by the caller. Not validated, see `clamped_progress`.
    pub progress: i32,
    /// When the entry was (re)registered
    pub started_at: DateTime<Utc>,
}

impl OperationState {
    /// Create a fresh active state with zero progress
    pub fn new(category: OperationCategory, message: Option<String>) -> Self {
        Self {
            category,
            active: true,
            message,
            progress: 0,
            started_at: Utc::now(),
        }
    }

    /// Progress clamped to 0..=100 for rendering
    pub fn clamped_progress(&self) -> u8 {
        self.progress.clamp(0, 100) as u8
    }

    /// Time elapsed since the entry was registered.
    ///
    /// Measured on the wall clock so it survives serialization. If the clock
    /// steps backwards past `started_at` the age saturates at zero until the
    /// clock catches up.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Whole seconds elapsed since the entry was registered
    pub fn age_secs(&self) -> u64 {
        self.age().as_secs()
    }
}

/// "Is any operation of this category in flight", one flag per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFlags {
    pub loading: bool,
    pub saving: bool,
    pub deleting: bool,
    pub uploading: bool,
    pub downloading: bool,
}

impl CategoryFlags {
    /// Build flags from per-category counts indexed by `OperationCategory::index`
    pub fn from_counts(counts: &[usize; OperationCategory::COUNT]) -> Self {
        Self {
            loading: counts[OperationCategory::Loading.index()] > 0,
            saving: counts[OperationCategory::Saving.index()] > 0,
            deleting: counts[OperationCategory::Deleting.index()] > 0,
            uploading: counts[OperationCategory::Uploading.index()] > 0,
            downloading: counts[OperationCategory::Downloading.index()] > 0,
        }
    }

    pub fn get(&self, category: OperationCategory) -> bool {
        match category {
            OperationCategory::Loading => self.loading,
            OperationCategory::Saving => self.saving,
            OperationCategory::Deleting => self.deleting,
            OperationCategory::Uploading => self.uploading,
            OperationCategory::Downloading => self.downloading,
        }
    }

    /// True if any category has an operation in flight
    pub fn any(&self) -> bool {
        self.loading || self.saving || self.deleting || self.uploading || self.downloading
    }
}

/// One registry entry, as exposed in snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedOperation {
    pub key: String,
    pub state: OperationState,
}

/// Point-in-time copy of the whole registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    /// Registered operations sorted by key
    pub operations: Vec<TrackedOperation>,
    pub flags: CategoryFlags,
}

// =====================================================
// Notifications
// =====================================================

/// Change notification published after every registry mutation.
///
/// `flags` is the aggregate view at the moment of the mutation, so an
/// observer never has to read the tracker back to stay consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    Started {
        key: String,
        state: OperationState,
        flags: CategoryFlags,
    },
    ProgressUpdated {
        key: String,
        progress: i32,
        flags: CategoryFlags,
    },
    Stopped {
        key: String,
        category: OperationCategory,
        flags: CategoryFlags,
    },
}

impl TrackerEvent {
    pub fn key(&self) -> &str {
        match self {
            TrackerEvent::Started { key, .. }
            | TrackerEvent::ProgressUpdated { key, .. }
            | TrackerEvent::Stopped { key, .. } => key,
        }
    }

    pub fn flags(&self) -> CategoryFlags {
        match self {
            TrackerEvent::Started { flags, .. }
            | TrackerEvent::ProgressUpdated { flags, .. }
            | TrackerEvent::Stopped { flags, .. } => *flags,
        }
    }

    /// Short event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            TrackerEvent::Started { .. } => "operation.started",
            TrackerEvent::ProgressUpdated { .. } => "operation.progress",
            TrackerEvent::Stopped { .. } => "operation.stopped",
        }
    }
}
