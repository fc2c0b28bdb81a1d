//! Render telemetry collector.
//!
//! The collector keeps a bounded history of [`RenderEvent`]s plus a tokio
//! broadcast stream for live subscribers. It is owned by the dispatcher
//! rather than living in a global.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::broadcast;

pub mod events;

pub use events::RenderEvent;

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<RenderEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
    pub failures: u64,
}

/// Broadcast-based collector retaining a bounded history of render events.
pub struct TelemetryCollector {
    tx: broadcast::Sender<RenderEvent>,
    history: Mutex<VecDeque<RenderEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
    failures: AtomicU64,
}

impl TelemetryCollector {
    /// `buffer` must be non-zero.
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: RenderEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if matches!(event, RenderEvent::RenderFailed { .. }) {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut history) = self.history.lock() {
            if self.history_capacity > 0 {
                if history.len() == self.history_capacity {
                    history.pop_front();
                    self.dropped_history.fetch_add(1, Ordering::Relaxed);
                }
                history.push_back(event.clone());
            }
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RenderEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let recent = self
            .history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default();
        TelemetrySnapshot {
            recent,
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(bytes: usize) -> RenderEvent {
        RenderEvent::RenderCompleted {
            location: "engine".to_string(),
            bytes,
            elapsed_ms: 1,
        }
    }

    #[test]
    fn collector_preserves_order_within_history() {
        let collector = TelemetryCollector::new(8, 3);
        collector.publish(completed(1));
        collector.publish(completed(2));
        collector.publish(RenderEvent::RenderFailed {
            location: "engine".to_string(),
            code: 3004,
            message: "boom".to_string(),
        });

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 3);
        assert_eq!(snapshot.recent[0], completed(1));
        assert!(matches!(
            snapshot.recent[2],
            RenderEvent::RenderFailed { code: 3004, .. }
        ));
        assert_eq!(snapshot.failures, 1);
    }

    #[test]
    fn collector_drops_history_when_full() {
        let collector = TelemetryCollector::new(8, 2);
        collector.publish(completed(1));
        collector.publish(completed(2));
        collector.publish(completed(3));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.dropped_events, 1);
        assert_eq!(snapshot.total_events, 3);
        assert_eq!(snapshot.recent[0], completed(2));
    }

    #[test]
    fn subscribers_receive_published_events() {
        let collector = TelemetryCollector::new(8, 0);
        let mut rx = collector.subscribe();
        collector.publish(completed(42));
        assert_eq!(rx.try_recv().unwrap(), completed(42));
        assert!(collector.snapshot().recent.is_empty());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(completed(5)).unwrap();
        assert_eq!(json["type"], "render_completed");
        assert_eq!(json["payload"]["bytes"], 5);
        assert_eq!(completed(5).location(), "engine");
    }
}
