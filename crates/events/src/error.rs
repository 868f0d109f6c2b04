use tessera_common::FromMessage;

use crate::subscription::SubscriptionId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid event pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("event bus is shut down")]
    ShutDown,

    #[error(
        "handler {subscription} (owner: {owner}) failed on '{event_type}': {message}",
        owner = .owner.as_deref().unwrap_or("-")
    )]
    HandlerExecution {
        event_type: String,
        subscription: SubscriptionId,
        owner: Option<String>,
        message: String,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn invalid_pattern(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

tessera_common::impl_context!();
