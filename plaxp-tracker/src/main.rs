//! Demo driver for the operation tracker.
//!
//! Runs a short session of simulated console work (a record save racing an
//! avatar upload) and logs every tracker event plus the aggregate flags.

use dotenv::dotenv;
use plaxp_tracker::{
    EventBroadcaster, LeakWatchdog, OperationCategory, OperationTracker, TrackerConfig,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let config = match TrackerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid tracker configuration: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("Initializing operation tracker");
    let broadcaster = Arc::new(EventBroadcaster::with_config(&config));
    let tracker = Arc::new(OperationTracker::with_config(&config, broadcaster));

    let watchdog = LeakWatchdog::from_config(tracker.clone(), &config);
    let watchdog_cancel = watchdog.cancellation_token();
    let watchdog_handle = watchdog.spawn();

    let (subscriber_id, mut events) = tracker.subscribe();
    let observer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let flags = event.flags();
            log::info!(
                "[OBSERVER] {} '{}' -> saving={} uploading={}",
                event.name(),
                event.key(),
                flags.saving,
                flags.uploading
            );
        }
    });

    let save = {
        let tracker = tracker.clone();
        async move {
            let guard = tracker.guard(
                "save-42",
                OperationCategory::Saving,
                Some("Saving record 42"),
            );
            for progress in [25, 55, 90] {
                tokio::time::sleep(Duration::from_millis(40)).await;
                guard.set_progress(progress);
            }
            guard.finish();
        }
    };

    let upload = {
        let tracker = tracker.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tracker
                .track(
                    "upload-7",
                    OperationCategory::Uploading,
                    Some("Uploading avatar"),
                    tokio::time::sleep(Duration::from_millis(200)),
                )
                .await;
        }
    };

    let status = {
        let tracker = tracker.clone();
        async move {
            for _ in 0..6 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let flags = tracker.flags();
                log::info!(
                    "[STATUS] {} active, saving={} uploading={}",
                    tracker.len(),
                    flags.saving,
                    flags.uploading
                );
            }
        }
    };

    tokio::join!(save, upload, status);

    let snapshot = tracker.snapshot();
    log::info!(
        "Session finished with {} active operation(s), any={}",
        snapshot.operations.len(),
        snapshot.flags.any()
    );

    tracker.unsubscribe(&subscriber_id);
    if let Err(e) = observer.await {
        log::warn!("Observer task failed: {}", e);
    }

    watchdog_cancel.cancel();
    if let Err(e) = watchdog_handle.await {
        log::warn!("Watchdog task failed: {}", e);
    }
}
