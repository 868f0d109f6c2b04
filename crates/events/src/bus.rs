//! The event bus: pattern-matched, priority-ordered, failure-isolated fan-out.

use std::{
    cmp::Reverse,
    panic::AssertUnwindSafe,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Instant,
};

use {
    futures::FutureExt,
    serde::Serialize,
    serde_json::Value,
    tracing::{debug, info, warn},
};

use tessera_common::panic_message;

#[cfg(feature = "metrics")]
use tessera_metrics::{counter, events as bus_metrics, gauge, histogram, labels};

use crate::{
    error::{Error, Result},
    event::{Event, EventPriority, HandlerFailure, kinds},
    history::{EventHistory, HistoryLimits},
    pattern::EventPattern,
    stats::{BusMetrics, BusStats},
    subscription::{EventCondition, EventHandler, SubscribeOptions, SubscriptionId},
};

/// Outcome of delivering one published event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Delivery {
    /// Subscriptions whose pattern matched the event type.
    pub matched: usize,
    /// Handlers actually invoked (condition held, `once` slot still free).
    pub invoked: usize,
    /// Invoked handlers that returned an error or panicked.
    pub failed: usize,
}

struct SubscriptionEntry {
    id: SubscriptionId,
    pattern: EventPattern,
    handler: Arc<dyn EventHandler>,
    priority: EventPriority,
    condition: Option<EventCondition>,
    once: bool,
    owner: Option<String>,
    consumed: AtomicBool,
}

impl SubscriptionEntry {
    fn condition_holds(&self, event: &Event) -> bool {
        let Some(condition) = &self.condition else {
            return true;
        };
        std::panic::catch_unwind(AssertUnwindSafe(|| condition(event))).unwrap_or_else(|_| {
            warn!(subscription = %self.id, event_type = %event.event_type, "subscription condition panicked");
            false
        })
    }
}

/// In-process publish/subscribe hub.
///
/// Subscriptions are kept in registration order; delivery sorts a snapshot of
/// the matching entries by descending priority with a stable sort, so ties
/// keep registration order. Handlers run outside the subscription lock.
pub struct EventBus {
    subscriptions: RwLock<Vec<Arc<SubscriptionEntry>>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
    stats: BusStats,
    history: Option<EventHistory>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            stats: BusStats::default(),
            history: None,
        }
    }

    /// A bus that also keeps a bounded ring of recent events.
    pub fn with_history(limits: HistoryLimits) -> Self {
        Self {
            history: Some(EventHistory::new(limits)),
            ..Self::new()
        }
    }

    /// Register `handler` for every event whose type matches `pattern`.
    pub fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId> {
        let pattern = EventPattern::parse(pattern)?;
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(SubscriptionEntry {
            id,
            pattern,
            handler,
            priority: options.priority,
            condition: options.condition,
            once: options.once,
            owner: options.owner,
            consumed: AtomicBool::new(false),
        });
        debug!(
            subscription = %id,
            pattern = %entry.pattern,
            priority = %entry.priority,
            owner = entry.owner.as_deref().unwrap_or("-"),
            once = entry.once,
            "subscribed"
        );
        let mut subs = self.write_subscriptions();
        subs.push(entry);
        #[cfg(feature = "metrics")]
        gauge!(bus_metrics::SUBSCRIPTIONS).set(subs.len() as f64);
        Ok(id)
    }

    /// Remove a subscription. Returns `false` if the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.write_subscriptions();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;
        #[cfg(feature = "metrics")]
        gauge!(bus_metrics::SUBSCRIPTIONS).set(subs.len() as f64);
        if removed {
            debug!(subscription = %id, "unsubscribed");
        }
        removed
    }

    /// Remove every subscription registered with `owner`. Returns how many
    /// were removed.
    pub fn unsubscribe_all(&self, owner: &str) -> usize {
        let mut subs = self.write_subscriptions();
        let before = subs.len();
        subs.retain(|s| s.owner.as_deref() != Some(owner));
        let removed = before - subs.len();
        #[cfg(feature = "metrics")]
        gauge!(bus_metrics::SUBSCRIPTIONS).set(subs.len() as f64);
        if removed > 0 {
            debug!(owner, removed, "revoked owner subscriptions");
        }
        removed
    }

    pub fn subscription_count(&self) -> usize {
        self.read_subscriptions().len()
    }

    pub fn owner_subscription_count(&self, owner: &str) -> usize {
        self.read_subscriptions()
            .iter()
            .filter(|s| s.owner.as_deref() == Some(owner))
            .count()
    }

    /// Publish an event and run every matching handler before returning.
    ///
    /// Handler failures never propagate: each one is logged, counted and
    /// re-published as a `system.error` event. The returned [`Delivery`]
    /// describes the original event only.
    pub async fn publish(&self, event: Event) -> Result<Delivery> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }

        let (delivery, failures) = self.deliver(Arc::new(event)).await;
        // Failures of `system.error` handlers are never turned into events,
        // so this does not recurse further.
        for error_event in failures {
            self.deliver(Arc::new(error_event)).await;
        }
        Ok(delivery)
    }

    /// Convenience wrapper over [`publish`](Self::publish).
    pub async fn emit(
        &self,
        event_type: &str,
        payload: Value,
        priority: EventPriority,
    ) -> Result<Delivery> {
        self.publish(Event::new(event_type, payload).with_priority(priority))
            .await
    }

    pub fn metrics(&self) -> BusMetrics {
        self.stats.snapshot()
    }

    /// Recent events, oldest first. Empty when the bus has no history ring.
    pub fn history(&self) -> Vec<Arc<Event>> {
        self.history
            .as_ref()
            .map(EventHistory::snapshot)
            .unwrap_or_default()
    }

    /// Stop accepting events and drop every subscription.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = {
            let mut subs = self.write_subscriptions();
            let n = subs.len();
            subs.clear();
            n
        };
        if let Some(history) = &self.history {
            history.clear();
        }
        info!(dropped_subscriptions = dropped, "event bus shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    async fn deliver(&self, event: Arc<Event>) -> (Delivery, Vec<Event>) {
        self.stats.record_published(&event.event_type);
        #[cfg(feature = "metrics")]
        counter!(bus_metrics::PUBLISHED_TOTAL, labels::EVENT_TYPE => event.event_type.clone())
            .increment(1);
        if let Some(history) = &self.history {
            history.push(Arc::clone(&event));
        }

        let mut matched: Vec<Arc<SubscriptionEntry>> = self
            .read_subscriptions()
            .iter()
            .filter(|s| s.pattern.matches(&event.event_type))
            .cloned()
            .collect();
        matched.sort_by_key(|s| Reverse(s.priority));

        let mut delivery = Delivery {
            matched: matched.len(),
            ..Delivery::default()
        };
        let mut failures = Vec::new();
        if matched.is_empty() {
            return (delivery, failures);
        }

        debug!(
            event_type = %event.event_type,
            priority = %event.priority,
            count = matched.len(),
            "dispatching event"
        );

        let is_error_event = event.event_type == kinds::ERROR_OCCURRED;
        for entry in matched {
            if !entry.condition_holds(&event) {
                continue;
            }
            // Claim the one-shot slot before running so concurrent publishes
            // cannot both fire it.
            if entry.once && entry.consumed.swap(true, Ordering::AcqRel) {
                continue;
            }

            let start = Instant::now();
            let outcome = AssertUnwindSafe(entry.handler.handle(Arc::clone(&event)))
                .catch_unwind()
                .await;
            let latency = start.elapsed();
            delivery.invoked += 1;

            if entry.once {
                self.unsubscribe(entry.id);
            }

            #[cfg(feature = "metrics")]
            histogram!(bus_metrics::HANDLER_DURATION_SECONDS).record(latency.as_secs_f64());

            let message = match outcome {
                Ok(Ok(())) => {
                    self.stats.record_success(latency);
                    #[cfg(feature = "metrics")]
                    counter!(bus_metrics::DELIVERED_TOTAL).increment(1);
                    continue;
                },
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
            };

            self.stats.record_failure(latency);
            delivery.failed += 1;
            #[cfg(feature = "metrics")]
            counter!(bus_metrics::HANDLER_FAILURES_TOTAL, labels::EVENT_TYPE => event.event_type.clone())
                .increment(1);

            let error = Error::HandlerExecution {
                event_type: event.event_type.clone(),
                subscription: entry.id,
                owner: entry.owner.clone(),
                message,
            };
            warn!(
                event_type = %event.event_type,
                subscription = %entry.id,
                owner = entry.owner.as_deref().unwrap_or("-"),
                error = %error,
                "event handler failed"
            );

            if is_error_event {
                continue;
            }
            let failure = HandlerFailure {
                event_type: event.event_type.clone(),
                subscription: entry.id.as_u64(),
                owner: entry.owner.clone(),
                error: error.to_string(),
            };
            match Event::from_payload(kinds::ERROR_OCCURRED, &failure) {
                Ok(error_event) => failures.push(
                    error_event
                        .with_priority(EventPriority::High)
                        .with_metadata("source_event", event.event_type.clone()),
                ),
                Err(e) => warn!(error = %e, "failed to encode handler failure"),
            }
        }

        (delivery, failures)
    }

    fn read_subscriptions(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<SubscriptionEntry>>> {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn write_subscriptions(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<SubscriptionEntry>>> {
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        sync::{Mutex, atomic::AtomicUsize},
        time::Duration,
    };

    use {super::*, crate::subscription::handler_fn, serde_json::json};

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> Arc<dyn EventHandler> {
        let log = Arc::clone(log);
        let label = label.to_string();
        handler_fn(move |_event| {
            let log = Arc::clone(&log);
            let label = label.clone();
            async move {
                log.lock().unwrap().push(label);
                Ok(())
            }
        })
    }

    fn counter(count: &Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
        let count = Arc::clone(count);
        handler_fn(move |_event| {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn git_operation_scenario() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));

        let logged = Arc::clone(&log);
        bus.subscribe(
            "git-operation",
            {
                let count = Arc::clone(&count);
                let logged = Arc::clone(&logged);
                handler_fn(move |_e| {
                    let count = Arc::clone(&count);
                    let logged = Arc::clone(&logged);
                    async move {
                        logged.lock().unwrap().push("counter".to_string());
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
            },
            SubscribeOptions::new().priority(EventPriority::Normal),
        )
        .unwrap();
        bus.subscribe(
            "git-*",
            recorder(&log, "logger"),
            SubscribeOptions::new().priority(EventPriority::High),
        )
        .unwrap();

        let delivery = bus
            .publish(Event::new("git-operation", json!({"op": "commit"})))
            .await
            .unwrap();

        assert_eq!(delivery.matched, 2);
        assert_eq!(delivery.invoked, 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*log.lock().unwrap(), vec!["logger", "counter"]);
    }

    #[tokio::test]
    async fn priority_then_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let low = SubscribeOptions::new().priority(EventPriority::Low);
        let normal = SubscribeOptions::new();
        let high = SubscribeOptions::new().priority(EventPriority::High);

        bus.subscribe("*", recorder(&log, "low-1"), low.clone()).unwrap();
        bus.subscribe("build", recorder(&log, "normal-1"), normal.clone())
            .unwrap();
        bus.subscribe("b*", recorder(&log, "high-1"), high.clone())
            .unwrap();
        bus.subscribe("*", recorder(&log, "normal-2"), normal).unwrap();
        bus.subscribe("build", recorder(&log, "high-2"), high).unwrap();
        bus.subscribe("other", recorder(&log, "never"), low).unwrap();

        let delivery = bus.emit("build", Value::Null, EventPriority::Normal).await.unwrap();

        assert_eq!(delivery.matched, 5);
        assert_eq!(*log.lock().unwrap(), vec![
            "high-1", "high-2", "normal-1", "normal-2", "low-1"
        ]);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id = bus
            .subscribe("x", counter(&count), SubscribeOptions::new())
            .unwrap();

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        bus.emit("x", Value::Null, EventPriority::Normal).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsubscribe_all_only_touches_owner() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for pattern in ["a", "b.*", "*"] {
            bus.subscribe(pattern, counter(&count), SubscribeOptions::new().owner("git"))
                .unwrap();
        }
        bus.subscribe("a", counter(&count), SubscribeOptions::new().owner("notify"))
            .unwrap();
        bus.subscribe("a", counter(&count), SubscribeOptions::new())
            .unwrap();

        assert_eq!(bus.unsubscribe_all("git"), 3);
        assert_eq!(bus.owner_subscription_count("git"), 0);
        assert_eq!(bus.owner_subscription_count("notify"), 1);
        assert_eq!(bus.subscription_count(), 2);
        assert_eq!(bus.unsubscribe_all("git"), 0);
    }

    #[tokio::test]
    async fn condition_filters_invocation() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "git-*",
            counter(&count),
            SubscribeOptions::new().when(|e| e.payload["op"] == "push"),
        )
        .unwrap();

        let skipped = bus
            .publish(Event::new("git-operation", json!({"op": "commit"})))
            .await
            .unwrap();
        let fired = bus
            .publish(Event::new("git-operation", json!({"op": "push"})))
            .await
            .unwrap();

        assert_eq!(skipped, Delivery {
            matched: 1,
            invoked: 0,
            failed: 0
        });
        assert_eq!(fired.invoked, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn once_fires_a_single_time() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe("tick", counter(&count), SubscribeOptions::new().once())
            .unwrap();

        bus.emit("tick", Value::Null, EventPriority::Normal).await.unwrap();
        bus.emit("tick", Value::Null, EventPriority::Normal).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn once_fires_once_under_concurrent_publishes() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let slow = {
            let count = Arc::clone(&count);
            handler_fn(move |_e| {
                let count = Arc::clone(&count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(())
                }
            })
        };
        bus.subscribe("tick", slow, SubscribeOptions::new().once())
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let bus = Arc::clone(&bus);
            tasks.push(tokio::spawn(async move {
                bus.emit("tick", Value::Null, EventPriority::Normal)
                    .await
                    .unwrap()
            }));
        }
        let mut invoked = 0;
        for task in tasks {
            invoked += task.await.unwrap().invoked;
        }

        assert_eq!(invoked, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn once_slot_consumed_by_error() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = {
            let calls = Arc::clone(&calls);
            handler_fn(move |_e| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("nope")
                }
            })
        };
        bus.subscribe("x", failing, SubscribeOptions::new().once())
            .unwrap();

        bus.emit("x", Value::Null, EventPriority::Normal).await.unwrap();
        bus.emit("x", Value::Null, EventPriority::Normal).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_is_isolated_and_reported() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(Mutex::new(Vec::<HandlerFailure>::new()));

        bus.subscribe(
            "job",
            handler_fn(|_e| async { anyhow::bail!("disk full") }),
            SubscribeOptions::new()
                .priority(EventPriority::High)
                .owner("storage"),
        )
        .unwrap();
        bus.subscribe(
            "job",
            handler_fn(|e| async move {
                if e.event_type == "job" {
                    panic!("kaboom");
                }
                Ok(())
            }),
            SubscribeOptions::new().priority(EventPriority::High),
        )
        .unwrap();
        bus.subscribe("job", counter(&count), SubscribeOptions::new())
            .unwrap();
        {
            let failures = Arc::clone(&failures);
            bus.subscribe(
                kinds::ERROR_OCCURRED,
                handler_fn(move |e| {
                    let failures = Arc::clone(&failures);
                    async move {
                        let failure: HandlerFailure = e.payload_as()?;
                        failures.lock().unwrap().push(failure);
                        Ok::<_, anyhow::Error>(())
                    }
                }),
                SubscribeOptions::new(),
            )
            .unwrap();
        }

        let delivery = bus.emit("job", Value::Null, EventPriority::Normal).await.unwrap();

        assert_eq!(delivery.invoked, 3);
        assert_eq!(delivery.failed, 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].event_type, "job");
        assert_eq!(failures[0].owner.as_deref(), Some("storage"));
        assert!(failures[0].error.contains("disk full"));
        assert!(failures[1].error.contains("kaboom"));

        let metrics = bus.metrics();
        assert_eq!(metrics.total_failed, 2);
        assert_eq!(metrics.total_delivered, 3);
        assert_eq!(metrics.per_type_counts["job"], 1);
        assert_eq!(metrics.per_type_counts[kinds::ERROR_OCCURRED], 2);
    }

    #[tokio::test]
    async fn error_handler_failures_do_not_loop() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "job",
            handler_fn(|_e| async { anyhow::bail!("first") }),
            SubscribeOptions::new(),
        )
        .unwrap();
        {
            let calls = Arc::clone(&calls);
            bus.subscribe(
                "system.*",
                handler_fn(move |_e| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        anyhow::bail!("monitor broken")
                    }
                }),
                SubscribeOptions::new(),
            )
            .unwrap();
        }

        bus.emit("job", Value::Null, EventPriority::Normal).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.metrics().total_published, 2);
        assert_eq!(bus.metrics().total_failed, 2);
    }

    #[tokio::test]
    async fn invalid_pattern_rejected() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let err = bus
            .subscribe("git-*-op", counter(&count), SubscribeOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_rejects_publish_and_subscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe("*", counter(&count), SubscribeOptions::new())
            .unwrap();

        bus.shutdown();
        assert!(bus.is_shut_down());
        assert_eq!(bus.subscription_count(), 0);
        assert!(matches!(
            bus.emit("x", Value::Null, EventPriority::Normal).await,
            Err(Error::ShutDown)
        ));
        assert!(matches!(
            bus.subscribe("*", counter(&count), SubscribeOptions::new()),
            Err(Error::ShutDown)
        ));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn history_records_published_events() {
        let bus = EventBus::with_history(HistoryLimits {
            max_size: 2,
            max_age: None,
        });
        for name in ["a", "b", "c"] {
            bus.emit(name, Value::Null, EventPriority::Low).await.unwrap();
        }
        let types: Vec<_> = bus.history().iter().map(|e| e.event_type.clone()).collect();
        assert_eq!(types, vec!["b", "c"]);
        assert!(EventBus::new().history().is_empty());
    }

    #[tokio::test]
    async fn handler_may_subscribe_during_delivery() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        {
            let inner_bus = Arc::clone(&bus);
            let count = Arc::clone(&count);
            bus.subscribe(
                "setup",
                handler_fn(move |_e| {
                    let bus = Arc::clone(&inner_bus);
                    let count = Arc::clone(&count);
                    async move {
                        bus.subscribe("late", counter(&count), SubscribeOptions::new())?;
                        Ok::<_, anyhow::Error>(())
                    }
                }),
                SubscribeOptions::new().once(),
            )
            .unwrap();
        }

        bus.emit("setup", Value::Null, EventPriority::Normal).await.unwrap();
        bus.emit("late", Value::Null, EventPriority::Normal).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
