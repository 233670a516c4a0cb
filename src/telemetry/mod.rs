//! Playback telemetry and finished-listener plumbing.
//!
//! Each session owns an [`EventCollector`] that keeps a bounded history and
//! fans events out over a broadcast channel, plus a [`FinishedListeners`]
//! observer list that the frame update invokes synchronously.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub mod events;

pub use events::{PlaybackEvent, SessionWarning};

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<PlaybackEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

/// Broadcast-based collector retaining a bounded history of events.
pub struct EventCollector {
    tx: broadcast::Sender<PlaybackEvent>,
    history: Mutex<VecDeque<PlaybackEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl EventCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<PlaybackEvent>> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn publish(&self, event: PlaybackEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if self.history_capacity > 0 {
            let mut history = self.history();
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        // No receivers is fine; events are also kept in history.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            recent: self.history().iter().cloned().collect(),
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Details passed to finished listeners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinishedInfo {
    pub current_time: f64,
    pub clip_length: f64,
    pub waiting_delay: f32,
}

/// Listener invoked when a session finishes. Keep it short; it runs inside
/// the frame update.
pub trait FinishedListener: Send + Sync {
    fn on_finished(&self, info: &FinishedInfo);
}

impl<F> FinishedListener for F
where
    F: Fn(&FinishedInfo) + Send + Sync,
{
    fn on_finished(&self, info: &FinishedInfo) {
        self(info)
    }
}

/// Handle returned by [`FinishedListeners::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

/// Ordered observer list for the finished notification.
#[derive(Default)]
pub struct FinishedListeners {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Arc<dyn FinishedListener>)>,
}

impl FinishedListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Arc<dyn FinishedListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Returns false when `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Invoke every listener in subscription order.
    pub fn notify(&self, info: &FinishedInfo) {
        for (_, listener) in &self.listeners {
            listener.on_finished(info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn info() -> FinishedInfo {
        FinishedInfo {
            current_time: 3.0,
            clip_length: 1.0,
            waiting_delay: 2.0,
        }
    }

    #[test]
    fn collector_retains_bounded_history() {
        let collector = EventCollector::new(8, 2);
        let mut rx = collector.subscribe();

        for t in [1.0, 2.0, 3.0] {
            collector.publish(PlaybackEvent::Paused { current_time: t });
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_events, 3);
        assert_eq!(snapshot.dropped_events, 1);
        assert_eq!(
            snapshot.recent,
            vec![
                PlaybackEvent::Paused { current_time: 2.0 },
                PlaybackEvent::Paused { current_time: 3.0 },
            ]
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            PlaybackEvent::Paused { current_time: 1.0 }
        );
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(PlaybackEvent::Stopped { current_time: 1.5 }).unwrap();
        assert_eq!(json["type"], "stopped");
        assert_eq!(json["payload"]["current_time"], 1.5);

        let warning = serde_json::to_value(PlaybackEvent::Warning {
            code: SessionWarning::ChannelLost,
            context: "update".to_string(),
        })
        .unwrap();
        assert_eq!(warning["payload"]["code"], "channel_lost");
    }

    #[test]
    fn listeners_fire_in_order_until_unsubscribed() {
        let mut listeners = FinishedListeners::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first_calls = Arc::clone(&calls);
        let first = listeners.subscribe(Arc::new(move |info: &FinishedInfo| {
            assert_eq!(info.current_time, 3.0);
            first_calls.fetch_add(1, Ordering::SeqCst);
        }));
        let second_calls = Arc::clone(&calls);
        listeners.subscribe(Arc::new(move |_: &FinishedInfo| {
            second_calls.fetch_add(10, Ordering::SeqCst);
        }));

        listeners.notify(&info());
        assert_eq!(calls.load(Ordering::SeqCst), 11);

        assert!(listeners.unsubscribe(first));
        assert!(!listeners.unsubscribe(first));
        listeners.notify(&info());
        assert_eq!(calls.load(Ordering::SeqCst), 21);
        assert_eq!(listeners.len(), 1);
    }
}
