//! Delivery counters for the bus.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::Serialize;

/// Point-in-time snapshot returned by [`crate::EventBus::metrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusMetrics {
    pub total_published: u64,
    /// Handler invocations that completed without error.
    pub total_delivered: u64,
    /// Handler invocations that returned an error or panicked.
    pub total_failed: u64,
    /// Published events per event type.
    pub per_type_counts: HashMap<String, u64>,
    pub average_handler_latency: Duration,
}

#[derive(Default)]
pub(crate) struct BusStats {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    total_latency_us: AtomicU64,
    per_type: Mutex<HashMap<String, u64>>,
}

impl BusStats {
    pub(crate) fn record_published(&self, event_type: &str) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let mut per_type = self.per_type.lock().unwrap_or_else(|e| e.into_inner());
        *per_type.entry(event_type.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn record_success(&self, latency: Duration) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub(crate) fn record_failure(&self, latency: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
    }

    fn add_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BusMetrics {
        let delivered = self.delivered.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let calls = delivered + failed;
        let average_handler_latency = if calls == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.total_latency_us.load(Ordering::Relaxed) / calls)
        };
        BusMetrics {
            total_published: self.published.load(Ordering::Relaxed),
            total_delivered: delivered,
            total_failed: failed,
            per_type_counts: self
                .per_type
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            average_handler_latency,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_over_all_invocations() {
        let stats = BusStats::default();
        stats.record_published("a");
        stats.record_published("a");
        stats.record_published("b");
        stats.record_success(Duration::from_micros(100));
        stats.record_failure(Duration::from_micros(300));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_published, 3);
        assert_eq!(snapshot.total_delivered, 1);
        assert_eq!(snapshot.total_failed, 1);
        assert_eq!(snapshot.per_type_counts["a"], 2);
        assert_eq!(snapshot.per_type_counts["b"], 1);
        assert_eq!(snapshot.average_handler_latency, Duration::from_micros(200));
    }

    #[test]
    fn empty_snapshot_has_zero_latency() {
        let snapshot = BusStats::default().snapshot();
        assert_eq!(snapshot, BusMetrics::default());
    }
}
