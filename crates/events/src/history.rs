//! Bounded ring of recently published events, for diagnostics only.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::event::Event;

/// Size and age bounds for the history ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    pub max_size: usize,
    /// Entries older than this are pruned. `None` keeps them until evicted by size.
    pub max_age: Option<Duration>,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_size: 256,
            max_age: Some(Duration::from_secs(3600)),
        }
    }
}

pub(crate) struct EventHistory {
    limits: HistoryLimits,
    entries: Mutex<VecDeque<(Instant, Arc<Event>)>>,
}

impl EventHistory {
    pub(crate) fn new(limits: HistoryLimits) -> Self {
        Self {
            limits,
            entries: Mutex::new(VecDeque::with_capacity(limits.max_size.min(1024))),
        }
    }

    pub(crate) fn push(&self, event: Arc<Event>) {
        if self.limits.max_size == 0 {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut entries, now);
        while entries.len() >= self.limits.max_size {
            entries.pop_front();
        }
        entries.push_back((now, event));
    }

    /// Oldest first.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Event>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut entries, Instant::now());
        entries.iter().map(|(_, e)| Arc::clone(e)).collect()
    }

    pub(crate) fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn prune(&self, entries: &mut VecDeque<(Instant, Arc<Event>)>, now: Instant) {
        let Some(max_age) = self.limits.max_age else {
            return;
        };
        while let Some((at, _)) = entries.front() {
            if now.duration_since(*at) > max_age {
                entries.pop_front();
            } else {
                break;
            }
        }
    }
}
