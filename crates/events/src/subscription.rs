//! Subscription handlers and options.

use std::{fmt, future::Future, sync::Arc};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::event::{Event, EventPriority};

/// Opaque identifier returned by [`crate::EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub(crate) u64);

impl SubscriptionId {
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receives events matching a subscription.
///
/// Errors (and panics) are contained by the bus: they are logged, counted and
/// re-published as `system.error` events, and never reach the publisher.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Arc<Event>) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, event: Arc<Event>) -> anyhow::Result<()> {
        (self.0)(event).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Predicate evaluated before a handler is invoked.
pub type EventCondition = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Options for [`crate::EventBus::subscribe`].
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    pub priority: EventPriority,
    pub condition: Option<EventCondition>,
    pub once: bool,
    pub owner: Option<String>,
}

impl SubscribeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn when(mut self, condition: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    #[must_use]
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("priority", &self.priority)
            .field("condition", &self.condition.is_some())
            .field("once", &self.once)
            .field("owner", &self.owner)
            .finish()
    }
}
