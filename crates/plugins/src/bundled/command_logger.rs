//! `command-logger` plugin: appends every `command.executed` event to a JSONL
//! file.

use std::{
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde_json::{Map, Value},
    tracing::{debug, warn},
};

use tessera_events::{Event, EventHandler, SubscribeOptions, kinds};

use crate::{
    manifest::PluginManifest,
    plugin::{Plugin, PluginContext},
};

/// Entry point the bundled manifest resolves to.
pub const ENTRY: &str = "bundled:command-logger";

pub fn manifest() -> PluginManifest {
    let mut manifest = PluginManifest::new("command-logger");
    manifest.version = env!("CARGO_PKG_VERSION").to_string();
    manifest.description = "Append executed commands to a JSONL log".to_string();
    manifest.provides = vec!["command-log".to_string()];
    manifest.hot_reload = true;
    manifest.priority = -10;
    manifest.entry = Some(ENTRY.to_string());
    manifest
}

/// Appends one JSON line per event.
pub struct CommandLogWriter {
    log_path: PathBuf,
    file: Mutex<Option<std::fs::File>>,
}

impl CommandLogWriter {
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            log_path,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }

    fn append(&self, event: &Event) -> Result<()> {
        let mut entry = Map::new();
        entry.insert("ts".into(), Value::String(event.timestamp.to_rfc3339()));
        match &event.payload {
            Value::Object(fields) => {
                for (k, v) in fields {
                    entry.insert(k.clone(), v.clone());
                }
            },
            other => {
                entry.insert("payload".into(), other.clone());
            },
        }

        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            if let Some(parent) = self.log_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)?;
            *guard = Some(file);
        }
        if let Some(f) = guard.as_mut() {
            writeln!(f, "{}", Value::Object(entry))?;
        }
        Ok(())
    }

    /// Close the file handle. The next event reopens it.
    pub fn close(&self) {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(f) = guard.as_mut()
            && let Err(e) = f.flush()
        {
            warn!(error = %e, "command-logger: flush failed");
        }
        *guard = None;
    }
}

#[async_trait]
impl EventHandler for CommandLogWriter {
    async fn handle(&self, event: Arc<Event>) -> Result<()> {
        if let Err(e) = self.append(&event) {
            warn!(path = %self.log_path.display(), error = %e, "command-logger: failed to write entry");
            return Err(e);
        }
        Ok(())
    }
}

/// Plugin wiring a [`CommandLogWriter`] to `command.executed`.
pub struct CommandLoggerPlugin {
    writer: Arc<CommandLogWriter>,
}

impl CommandLoggerPlugin {
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            writer: Arc::new(CommandLogWriter::new(log_path)),
        }
    }
}

#[async_trait]
impl Plugin for CommandLoggerPlugin {
    async fn init(&self, ctx: &mut PluginContext) -> Result<()> {
        debug!(path = %self.writer.path().display(), "command-logger: logging commands");
        ctx.subscribe(
            kinds::COMMAND_EXECUTED,
            Arc::clone(&self.writer) as Arc<dyn EventHandler>,
            SubscribeOptions::new(),
        )?;
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        self.writer.close();
        Ok(())
    }
}
