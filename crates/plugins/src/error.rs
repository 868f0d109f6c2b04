use std::path::{Path, PathBuf};

use {tessera_common::FromMessage, thiserror::Error};

use crate::plugin::PluginStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("plugin '{name}' is not registered")]
    NotFound { name: String },

    #[error("plugin '{plugin}' requires unavailable capabilities: {}", .missing.join(", "))]
    UnresolvedDependency { plugin: String, missing: Vec<String> },

    #[error("plugin '{plugin}' failed to initialize: {message}")]
    PluginInit { plugin: String, message: String },

    #[error("plugin '{plugin}' does not support hot reload")]
    HotReloadUnsupported { plugin: String },

    #[error("cannot {operation} plugin '{plugin}' while it is {status}")]
    InvalidState {
        plugin: String,
        status: PluginStatus,
        operation: &'static str,
    },

    #[error("plugin '{plugin}' registers command '{command}' already owned by '{owner}'")]
    CommandConflict {
        plugin: String,
        command: String,
        owner: String,
    },

    #[error("plugin '{plugin}' is not eligible on this system: {reasons}")]
    Ineligible { plugin: String, reasons: String },

    #[error("invalid plugin manifest at {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    #[error(transparent)]
    Events(#[from] tessera_events::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::NotFound {
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_manifest(path: &Path, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn plugin_init(plugin: &str, message: impl Into<String>) -> Self {
        Self::PluginInit {
            plugin: plugin.to_string(),
            message: message.into(),
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
