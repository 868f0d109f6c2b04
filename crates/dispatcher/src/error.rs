use {tessera_common::FromMessage, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument '{argument}': expected key=value")]
    InvalidArgument { argument: String },

    #[error(transparent)]
    Plugins(#[from] tessera_plugins::Error),

    #[error(transparent)]
    Gateway(#[from] tessera_mcp::Error),

    #[error(transparent)]
    Events(#[from] tessera_events::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
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
