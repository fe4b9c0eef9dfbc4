//! Diagnostics telemetry collector and helpers.
//!
//! The collector multiplexes acquisition, iteration, and batch events into a
//! bounded history plus an async broadcast stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use tokio::sync::broadcast;

use crate::recording::Resolution;

pub mod events;

pub use events::MetricEvent;

/// Global telemetry hub shared across the crate.
static HUB: Lazy<TelemetryHub> = Lazy::new(TelemetryHub::default);

/// Access the global telemetry hub.
pub fn hub() -> &'static TelemetryHub {
    &HUB
}

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

/// Broadcast-based collector retaining a bounded history of metrics.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<VecDeque<MetricEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity: history_capacity.max(1),
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = lock(&self.history);
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let history = lock(&self.history);
        TelemetrySnapshot {
            recent: history.iter().cloned().collect(),
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Rolling window over iteration outcomes to compute the fallback ratio.
struct FallbackTracker {
    samples: VecDeque<bool>,
    max_samples: usize,
}

impl FallbackTracker {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    fn observe(&mut self, fallback: bool) -> (f32, usize) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(fallback);

        let count = self.samples.len();
        let fallbacks = self.samples.iter().filter(|&&f| f).count();
        (fallbacks as f32 / count as f32, count)
    }
}

/// Top-level hub wrapping collector state plus derived gauges.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    fallbacks: Mutex<FallbackTracker>,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize, fallback_window: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            fallbacks: Mutex::new(FallbackTracker::new(fallback_window)),
        }
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.collector.snapshot()
    }

    pub fn record(&self, event: MetricEvent) {
        self.collector.publish(event);
    }

    /// Publish an iteration outcome and the updated fallback ratio
    pub fn record_iteration(&self, index: u32, frequency_hz: u32, resolution: Resolution) {
        self.collector.publish(MetricEvent::IterationResolved {
            index,
            frequency_hz,
            resolution,
        });

        let (ratio, sample_count) = lock(&self.fallbacks).observe(resolution.is_fallback());

        self.collector.publish(MetricEvent::FallbackRate {
            ratio,
            sample_count,
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(256, 64, 32)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_preserves_order_within_history() {
        let collector = TelemetryCollector::new(8, 3);
        collector.publish(MetricEvent::Recovery { succeeded: true });
        collector.publish(MetricEvent::AcquisitionFailed { code: 1001 });
        collector.publish(MetricEvent::BatchCompleted {
            average_hz: 470,
            is_angelic: false,
        });

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 3);
        assert!(matches!(
            snapshot.recent[0],
            MetricEvent::Recovery { succeeded: true }
        ));
        assert!(matches!(
            snapshot.recent[2],
            MetricEvent::BatchCompleted { average_hz: 470, .. }
        ));
    }

    #[test]
    fn collector_drops_history_when_full() {
        let collector = TelemetryCollector::new(8, 2);
        for code in [1001, 1002, 1003] {
            collector.publish(MetricEvent::AcquisitionFailed { code });
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.dropped_events, 1);
        assert_eq!(
            snapshot.recent[0],
            MetricEvent::AcquisitionFailed { code: 1002 }
        );
    }

    #[test]
    fn hub_tracks_fallback_ratio() {
        let hub = TelemetryHub::new(8, 16, 4);
        hub.record_iteration(1, 528, Resolution::Detected);
        hub.record_iteration(2, 700, Resolution::Timeout);

        let snapshot = hub.snapshot();
        let last_ratio = snapshot.recent.iter().rev().find_map(|event| match event {
            MetricEvent::FallbackRate {
                ratio,
                sample_count,
            } => Some((*ratio, *sample_count)),
            _ => None,
        });
        assert_eq!(last_ratio, Some((0.5, 2)));
        assert!(snapshot
            .recent
            .iter()
            .any(|event| matches!(event, MetricEvent::IterationResolved { index: 1, .. })));
    }

    #[test]
    fn subscribers_receive_published_events() {
        let collector = TelemetryCollector::new(8, 8);
        let mut rx = collector.subscribe();
        collector.publish(MetricEvent::SilenceWarning { silent_frames: 100 });
        assert_eq!(
            rx.try_recv().ok(),
            Some(MetricEvent::SilenceWarning { silent_frames: 100 })
        );
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_string(&MetricEvent::Recovery { succeeded: false }).unwrap();
        assert_eq!(json, r#"{"type":"recovery","payload":{"succeeded":false}}"#);
    }
}
