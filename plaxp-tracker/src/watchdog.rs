//! Periodic report of operations that have been registered for a long time.
//!
//! Entries are never expired: a large upload can legitimately run for
//! hours, so the watchdog only logs what looks like a forgotten `stop`.

use crate::config::TrackerConfig;
use crate::tracker::OperationTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct LeakWatchdog {
    tracker: Arc<OperationTracker>,
    threshold: Duration,
    interval: Duration,
    cancel: CancellationToken,
}

impl LeakWatchdog {
    pub fn new(tracker: Arc<OperationTracker>, threshold: Duration, interval: Duration) -> Self {
        Self {
            tracker,
            threshold,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(tracker: Arc<OperationTracker>, config: &TrackerConfig) -> Self {
        Self::new(
            tracker,
            config.long_running_threshold(),
            config.watchdog_interval(),
        )
    }

    /// Token that stops the loop when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Single pass: log and return the keys older than the threshold
    pub fn scan(&self) -> Vec<String> {
        let stale = self.tracker.long_running(self.threshold);
        for op in &stale {
            log::warn!(
                "[WATCHDOG] Operation '{}' ({}) active for {}s at {}% - possible missing stop",
                op.key,
                op.state.category,
                op.state.age_secs(),
                op.state.progress
            );
        }
        stale.into_iter().map(|op| op.key).collect()
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        log::info!(
            "[WATCHDOG] Scanning every {}s for operations older than {}s",
            self.interval.as_secs(),
            self.threshold.as_secs()
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let stale = self.scan();
                    if !stale.is_empty() {
                        log::debug!("[WATCHDOG] {} long-running operation(s)", stale.len());
                    }
                }
            }
        }

        log::info!("[WATCHDOG] Shutting down");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
