//! In-process publish/subscribe hub.
//!
//! - Events and well-known event types (`event`)
//! - Subscription patterns: exact, trailing-`*` prefix, universal `*` (`pattern`)
//! - Handlers and subscription options (`subscription`)
//! - The bus itself with ordered, failure-isolated fan-out (`bus`)
//! - Delivery statistics and the diagnostic history ring (`stats`, `history`)

pub mod bus;
pub mod error;
pub mod event;
pub mod history;
pub mod pattern;
pub mod stats;
pub mod subscription;

pub use {
    bus::{Delivery, EventBus},
    error::{Error, Result},
    event::{Event, EventPriority, HandlerFailure, kinds},
    history::HistoryLimits,
    pattern::EventPattern,
    stats::BusMetrics,
    subscription::{
        EventCondition, EventHandler, FnHandler, SubscribeOptions, SubscriptionId, handler_fn,
    },
};
