//! Resolving a manifest to plugin code.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use anyhow::bail;

use crate::{manifest::PluginManifest, plugin::Plugin, shell::ShellPlugin};

/// Builds a plugin instance from a manifest's entry point.
pub type PluginFactory =
    Arc<dyn Fn(&PluginManifest) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync>;

/// Turns a manifest into a runnable [`Plugin`].
pub trait PluginLoader: Send + Sync {
    fn instantiate(&self, manifest: &PluginManifest) -> anyhow::Result<Arc<dyn Plugin>>;
}

/// Loader backed by a table of named entry points.
///
/// Manifests with an `entry` are built by the factory registered under that
/// name. Manifests without one become a [`ShellPlugin`] over their
/// `[commands]` table.
#[derive(Default)]
pub struct DefaultLoader {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl DefaultLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for an entry point.
    pub fn register(
        &self,
        entry: impl Into<String>,
        factory: impl Fn(&PluginManifest) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    ) {
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entry.into(), Arc::new(factory));
    }

    pub fn has_entry(&self, entry: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(entry)
    }
}

impl PluginLoader for DefaultLoader {
    fn instantiate(&self, manifest: &PluginManifest) -> anyhow::Result<Arc<dyn Plugin>> {
        let Some(entry) = &manifest.entry else {
            return Ok(Arc::new(ShellPlugin::from_manifest(manifest)));
        };
        // Clone the factory out so it runs without the table lock.
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(entry)
            .cloned();
        match factory {
            Some(factory) => factory(manifest),
            None => bail!("no entry point '{entry}' registered for plugin '{}'", manifest.name),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::plugin::PluginContext,
        async_trait::async_trait,
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    struct Marker;

    #[async_trait]
    impl Plugin for Marker {
        async fn init(&self, _ctx: &mut PluginContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn entry_point_uses_registered_factory() {
        let loader = DefaultLoader::new();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            loader.register("builtin.marker", move |_manifest| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Marker) as Arc<dyn Plugin>)
            });
        }
        assert!(loader.has_entry("builtin.marker"));

        let mut manifest = PluginManifest::new("marker");
        manifest.entry = Some("builtin.marker".into());
        loader.instantiate(&manifest).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_entry_point_fails() {
        let mut manifest = PluginManifest::new("ghost");
        manifest.entry = Some("builtin.ghost".into());
        let err = DefaultLoader::new().instantiate(&manifest).err().unwrap();
        assert!(err.to_string().contains("builtin.ghost"));
    }

    #[test]
    fn no_entry_point_builds_shell_plugin() {
        let manifest = PluginManifest::new("plain");
        assert!(DefaultLoader::new().instantiate(&manifest).is_ok());
    }
}
