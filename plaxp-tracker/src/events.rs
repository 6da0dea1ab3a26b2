use crate::config::TrackerConfig;
use dashmap::DashMap;
use operation_tracker_types::TrackerEvent;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Fans tracker events out to every subscribed observer.
///
/// `broadcast()` never blocks: each subscriber gets a `try_send`, so a slow
/// observer loses events instead of stalling the caller that mutated the
/// registry. No runtime is needed to publish, only to `.recv().await`.
pub struct EventBroadcaster {
    /// Subscriber id -> bounded sender
    clients: DashMap<String, mpsc::Sender<TrackerEvent>>,
    /// Ring buffer of recent events for replay on subscribe
    recent_events: Mutex<VecDeque<TrackerEvent>>,
    /// Replay buffer length; zero disables replay
    buffer_size: usize,
    subscriber_capacity: usize,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::with_config(&TrackerConfig::default())
    }

    pub fn with_config(config: &TrackerConfig) -> Self {
        Self {
            clients: DashMap::new(),
            recent_events: Mutex::new(VecDeque::with_capacity(config.event_buffer_size)),
            buffer_size: config.event_buffer_size,
            subscriber_capacity: config.subscriber_capacity,
        }
    }

    /// Subscribe a new observer and return (subscriber_id, receiver).
    pub fn subscribe(&self) -> (String, mpsc::Receiver<TrackerEvent>) {
        let client_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.subscriber_capacity);
        self.clients.insert(client_id.clone(), tx);

        log::debug!("Observer {} subscribed to tracker events", client_id);
        (client_id, rx)
    }

    /// Unsubscribe an observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, client_id: &str) {
        if self.clients.remove(client_id).is_some() {
            log::debug!("Observer {} unsubscribed from tracker events", client_id);
        }
    }

    /// Snapshot of recent events, oldest first
    pub fn recent_events(&self) -> Vec<TrackerEvent> {
        self.recent_events.lock().iter().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.clients.len()
    }

    /// Buffer the event and deliver it to all current subscribers.
    pub fn broadcast(&self, event: TrackerEvent) {
        if self.buffer_size > 0 {
            let mut buffer = self.recent_events.lock();
            while buffer.len() >= self.buffer_size {
                buffer.pop_front();
            }
            buffer.push_back(event.clone());
        }

        let event_name = event.name();

        if log::log_enabled!(log::Level::Trace) {
            if let Ok(json) = serde_json::to_string(&event) {
                log::trace!(
                    "[BROADCAST] '{}' to {} observer(s): {}",
                    event_name,
                    self.clients.len(),
                    json
                );
            }
        }

        let mut closed_clients = Vec::new();

        for entry in self.clients.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!(
                        "[BROADCAST] Channel full for observer {}, dropping '{}' event",
                        entry.key(),
                        event_name
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed_clients.push(entry.key().clone());
                }
            }
        }

        // Removal must happen after iteration releases the shard guards
        for client_id in closed_clients {
            self.clients.remove(&client_id);
            log::debug!("Removed disconnected observer {}", client_id);
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
