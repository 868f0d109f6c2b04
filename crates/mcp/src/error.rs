use std::{error::Error as StdError, time::Duration};

use tessera_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("provider '{provider}' is not configured")]
    ProviderNotFound { provider: String },

    #[error("provider '{provider}' is disabled")]
    ProviderDisabled { provider: String },

    #[error("provider '{provider}' is unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("provider '{provider}' has no tool '{tool}'")]
    ToolNotFound { provider: String, tool: String },

    #[error("invalid arguments for '{provider}/{tool}': {}", .violations.join("; "))]
    InvalidArguments {
        provider: String,
        tool: String,
        violations: Vec<String>,
    },

    #[error("argument '{argument}' of '{provider}/{tool}' violates security constraints: {reason}")]
    ConstraintViolation {
        provider: String,
        tool: String,
        argument: String,
        reason: String,
    },

    #[error("session pool exhausted ({max_sessions} sessions in use)")]
    PoolExhausted { max_sessions: usize },

    #[error("'{provider}/{tool}' timed out after {timeout:?}")]
    Timeout {
        provider: String,
        tool: String,
        timeout: Duration,
    },

    #[error("JSON-RPC error on '{method}': code={code} message={message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("server rejected credentials (401)")]
    Unauthorized { www_authenticate: Option<String> },

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
    #[error("{message}")]
    Message { message: String },
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn unavailable(provider: &str, reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the failure says nothing about the session's health.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArguments { .. }
                | Self::ConstraintViolation { .. }
                | Self::ToolNotFound { .. }
                | Self::ProviderNotFound { .. }
                | Self::ProviderDisabled { .. }
        )
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

tessera_common::impl_context!();
