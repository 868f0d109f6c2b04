//! Event records published on the bus.

use std::{collections::HashMap, fmt};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::Value,
};

/// Well-known event types published by the runtime itself.
pub mod kinds {
    /// A subscriber handler failed; payload is [`super::HandlerFailure`].
    pub const ERROR_OCCURRED: &str = "system.error";
    /// A command finished executing (success or failure).
    pub const COMMAND_EXECUTED: &str = "command.executed";
    /// Plugin lifecycle transitions.
    pub const PLUGIN_LOADED: &str = "plugin.loaded";
    pub const PLUGIN_UNLOADED: &str = "plugin.unloaded";
    pub const PLUGIN_RELOADING: &str = "plugin.reloading";
    pub const PLUGIN_FAILED: &str = "plugin.failed";
}

/// Delivery priority of an event or subscription. Higher runs first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Normal => f.write_str("normal"),
            Self::High => f.write_str("high"),
        }
    }
}

/// An immutable fact published to the bus.
///
/// Subscribers receive it as `Arc<Event>`; nothing mutates it after
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub priority: EventPriority,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            priority: EventPriority::Normal,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Build an event whose payload is the serialized form of `payload`.
    pub fn from_payload<T: Serialize>(
        event_type: impl Into<String>,
        payload: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self::new(event_type, serde_json::to_value(payload)?))
    }

    #[must_use]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Deserialize the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }
}

/// Payload of [`kinds::ERROR_OCCURRED`] events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerFailure {
    /// Type of the event whose handler failed.
    pub event_type: String,
    pub subscription: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub error: String,
}
