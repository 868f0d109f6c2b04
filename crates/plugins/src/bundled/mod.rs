//! Plugins shipped with the host.

pub mod command_logger;

use std::{path::PathBuf, sync::Arc};

use crate::{loader::DefaultLoader, manifest::PluginManifest, plugin::Plugin};

/// Register the entry points of every bundled plugin with `loader` and return
/// their manifests for the runtime.
pub fn install(loader: &DefaultLoader, command_log: PathBuf) -> Vec<PluginManifest> {
    loader.register(command_logger::ENTRY, move |_manifest| {
        Ok(Arc::new(command_logger::CommandLoggerPlugin::new(command_log.clone())) as Arc<dyn Plugin>)
    });
    vec![command_logger::manifest()]
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{PluginRuntime, discovery::PluginSource, loader::PluginLoader, plugin::PluginStatus},
        serde_json::json,
        tessera_events::{EventBus, EventPriority, kinds},
    };

    #[tokio::test]
    async fn command_logger_records_published_commands() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("commands.log");
        let bus = Arc::new(EventBus::new());
        let loader = Arc::new(DefaultLoader::new());
        let runtime = PluginRuntime::new(Arc::clone(&bus), Arc::clone(&loader) as Arc<dyn PluginLoader>);

        for manifest in install(&loader, log.clone()) {
            runtime.register(manifest, PluginSource::Bundled).unwrap();
        }
        assert!(runtime.load("command-logger").await.unwrap());
        assert_eq!(runtime.status("command-logger"), Some(PluginStatus::Active));

        bus.emit(kinds::COMMAND_EXECUTED, json!({"command": "ls"}), EventPriority::Normal)
            .await
            .unwrap();
        runtime.unload("command-logger").await.unwrap();
        bus.emit(kinds::COMMAND_EXECUTED, json!({"command": "ignored"}), EventPriority::Normal)
            .await
            .unwrap();

        let content = std::fs::read_to_string(&log).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("\"ls\""));
    }
}
