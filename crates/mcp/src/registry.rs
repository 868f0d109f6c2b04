//! ProviderRegistry: configured providers and the in-process provider
//! modules `internal` providers resolve to.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use tracing::{debug, info, warn};

use tessera_config::{ProviderConfig, ProviderTransportConfig};

use crate::{
    error::{Error, Result},
    local::LocalProvider,
};

#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderConfig>,
    modules: HashMap<String, Arc<dyn LocalProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration. Later duplicates are ignored.
    pub fn from_configs(configs: &[ProviderConfig]) -> Self {
        let mut registry = Self::new();
        for config in configs {
            if registry.providers.contains_key(&config.name) {
                warn!(provider = %config.name, "duplicate provider name, keeping the first");
                continue;
            }
            registry.providers.insert(config.name.clone(), config.clone());
        }
        registry
    }

    /// Add or replace a provider configuration.
    pub fn add(&mut self, config: ProviderConfig) {
        info!(provider = %config.name, transport = config.transport.kind(), "adding provider");
        self.providers.insert(config.name.clone(), config);
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.providers.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&ProviderConfig> {
        self.providers
            .get(name)
            .ok_or_else(|| Error::ProviderNotFound {
                provider: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.values()
    }

    pub fn enabled_providers(&self) -> Vec<&ProviderConfig> {
        self.providers.values().filter(|p| p.enabled).collect()
    }

    /// Returns `Ok(false)` if the provider was already enabled.
    pub fn enable(&mut self, name: &str) -> Result<bool> {
        self.set_enabled(name, true)
    }

    /// Returns `Ok(false)` if the provider was already disabled.
    pub fn disable(&mut self, name: &str) -> Result<bool> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<bool> {
        let provider = self
            .providers
            .get_mut(name)
            .ok_or_else(|| Error::ProviderNotFound {
                provider: name.to_string(),
            })?;
        if provider.enabled == enabled {
            return Ok(false);
        }
        provider.enabled = enabled;
        debug!(provider = name, enabled, "provider toggled");
        Ok(true)
    }

    /// Make an in-process provider available under `module`.
    pub fn register_module(&mut self, module: impl Into<String>, provider: Arc<dyn LocalProvider>) {
        self.modules.insert(module.into(), provider);
    }

    pub fn module(&self, module: &str) -> Option<Arc<dyn LocalProvider>> {
        self.modules.get(module).cloned()
    }

    /// Register `provider` under `module` and add an enabled `internal`
    /// provider config named `name` pointing at it.
    pub fn add_local(&mut self, name: &str, module: &str, provider: Arc<dyn LocalProvider>) {
        self.register_module(module, provider);
        self.add(ProviderConfig {
            name: name.to_string(),
            transport: ProviderTransportConfig::Internal {
                module: module.to_string(),
            },
            enabled: true,
            security_constraints: None,
        });
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::local::ToolSet};

    fn subprocess(name: &str, enabled: bool) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            transport: ProviderTransportConfig::Subprocess {
                command: "echo".into(),
                args: Vec::new(),
                env: HashMap::new(),
            },
            enabled,
            security_constraints: None,
        }
    }

    #[test]
    fn from_configs_keeps_first_duplicate() {
        let mut second = subprocess("fs", false);
        second.transport = ProviderTransportConfig::Internal {
            module: "other".into(),
        };
        let registry = ProviderRegistry::from_configs(&[subprocess("fs", true), second]);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["fs"]);
        assert_eq!(registry.get("fs").unwrap().transport.kind(), "subprocess");
    }

    #[test]
    fn enable_disable_report_changes() {
        let mut registry = ProviderRegistry::from_configs(&[subprocess("fs", true)]);
        assert!(!registry.enable("fs").unwrap());
        assert!(registry.disable("fs").unwrap());
        assert!(registry.enabled_providers().is_empty());
        assert!(matches!(
            registry.enable("nope"),
            Err(Error::ProviderNotFound { .. })
        ));
    }

    #[test]
    fn add_local_registers_module_and_config() {
        let mut registry = ProviderRegistry::new();
        registry.add_local("text", "builtin.text", Arc::new(ToolSet::new()));
        assert!(registry.module("builtin.text").is_some());
        assert_eq!(registry.get("text").unwrap().transport.kind(), "internal");
        assert!(registry.remove("text"));
        assert!(registry.require("text").is_err());
    }
}
