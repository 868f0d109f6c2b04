//! The host: one event bus, plugin runtime, protocol gateway and dispatcher
//! assembled from a [`TesseraConfig`].

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    serde::Serialize,
    serde_json::Value,
    tokio::task::JoinHandle,
    tracing::info,
};

use {
    tessera_config::{EventsConfig, TesseraConfig, plugin_dirs},
    tessera_events::{BusMetrics, EventBus, HistoryLimits},
    tessera_mcp::{GatewaySettings, LocalProvider, ProtocolGateway, ProviderRegistry, ProviderStatus},
    tessera_plugins::{
        DefaultLoader, PluginInfo, PluginLoader, PluginRuntime, PluginSource, PluginStatus, bundled,
    },
};

use crate::{
    dispatcher::{CommandDispatcher, CommandResult},
    error::Result,
};

/// What [`Tessera::start`] did.
#[derive(Debug, Default, Serialize)]
pub struct StartReport {
    pub discovered: Vec<String>,
    pub loaded: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub skipped: Vec<String>,
    pub providers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct HostStatus {
    pub plugins: Vec<PluginInfo>,
    pub commands: Vec<(String, String)>,
    pub providers: Vec<ProviderStatus>,
    pub bus: BusMetrics,
}

pub struct Tessera {
    config: TesseraConfig,
    plugin_dirs: Vec<PathBuf>,
    bus: Arc<EventBus>,
    loader: Arc<DefaultLoader>,
    runtime: Arc<PluginRuntime>,
    gateway: Arc<ProtocolGateway>,
    dispatcher: CommandDispatcher,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl Tessera {
    pub fn from_config(config: TesseraConfig) -> Self {
        let bus = Arc::new(build_bus(&config.events));
        let loader = Arc::new(DefaultLoader::new());
        let runtime = Arc::new(PluginRuntime::new(
            Arc::clone(&bus),
            Arc::clone(&loader) as Arc<dyn PluginLoader>,
        ));
        let gateway = Arc::new(ProtocolGateway::new(
            ProviderRegistry::from_configs(&config.providers),
            GatewaySettings::from(&config.gateway),
        ));
        let dispatcher = CommandDispatcher::new(Arc::clone(&runtime), Arc::clone(&gateway))
            .with_default_provider(config.gateway.default_provider.clone());

        Self {
            plugin_dirs: plugin_dirs(&config.plugins.dirs),
            config,
            bus,
            loader,
            runtime,
            gateway,
            dispatcher,
            reaper: Mutex::new(None),
        }
    }

    /// Replace the plugin search path.
    #[must_use]
    pub fn with_plugin_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.plugin_dirs = dirs;
        self
    }

    pub fn config(&self) -> &TesseraConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Entry-point table for plugins implemented in the host process.
    pub fn loader(&self) -> &Arc<DefaultLoader> {
        &self.loader
    }

    pub fn runtime(&self) -> &Arc<PluginRuntime> {
        &self.runtime
    }

    pub fn gateway(&self) -> &Arc<ProtocolGateway> {
        &self.gateway
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Make an in-process provider available to `internal` providers whose
    /// `module` is `module`.
    pub async fn register_provider_module(&self, module: &str, provider: Arc<dyn LocalProvider>) {
        self.gateway.register_module(module, provider).await;
    }

    pub fn plugin_dirs(&self) -> &[PathBuf] {
        &self.plugin_dirs
    }

    /// Register bundled plugins and scan the plugin directories without
    /// loading anything. Returns the names newly found on disk.
    pub async fn discover_plugins(&self) -> Result<Vec<String>> {
        let plugins = &self.config.plugins;
        for capability in &plugins.builtin_capabilities {
            self.runtime.add_builtin_capability(capability.clone());
        }
        if let Some(log) = &plugins.command_log {
            for manifest in bundled::install(&self.loader, log.clone()) {
                self.runtime.register(manifest, PluginSource::Bundled)?;
            }
        }
        Ok(self.runtime.discover(&self.plugin_dirs).await?)
    }

    /// Register bundled plugins, discover plugin directories, load plugins
    /// (when `autoload` is set) and connect enabled providers.
    ///
    /// Individual plugin and provider failures are reported, not returned.
    pub async fn start(&self) -> Result<StartReport> {
        let mut report = StartReport::default();
        let plugins = &self.config.plugins;

        report.discovered = self.discover_plugins().await?;

        if plugins.autoload {
            let mut names = Vec::new();
            for info in self.runtime.list() {
                if info.status == PluginStatus::Active {
                    continue;
                }
                if plugins.disabled.contains(&info.name) {
                    report.skipped.push(info.name);
                } else {
                    names.push(info.name);
                }
            }
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            for (name, result) in self.runtime.load_many(&refs).await {
                match result {
                    Ok(_) => report.loaded.push(name),
                    Err(e) => report.failed.push((name, e.to_string())),
                }
            }
        }

        report.providers = self.gateway.start_enabled().await;
        self.spawn_reaper();

        info!(
            discovered = report.discovered.len(),
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            providers = report.providers.len(),
            "tessera started"
        );
        Ok(report)
    }

    fn spawn_reaper(&self) {
        let interval = (self.gateway.settings().idle_timeout / 2)
            .clamp(Duration::from_secs(1), Duration::from_secs(60));
        let mut slot = self.reaper.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(self.gateway.spawn_reaper(interval)) {
            previous.abort();
        }
    }

    pub async fn execute(&self, command: &str, args: Value) -> CommandResult {
        self.dispatcher.execute(command, args).await
    }

    pub async fn status(&self) -> HostStatus {
        HostStatus {
            plugins: self.runtime.list(),
            commands: self.runtime.commands(),
            providers: self.gateway.status_all().await,
            bus: self.bus.metrics(),
        }
    }

    /// Unload plugins, close provider sessions and shut the bus down.
    pub async fn shutdown(&self) {
        let reaper = self.reaper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(reaper) = reaper {
            reaper.abort();
        }
        let unloaded = self.runtime.unload_all().await;
        self.gateway.shutdown_all().await;
        self.bus.shutdown();
        info!(unloaded, "tessera stopped");
    }
}

fn build_bus(config: &EventsConfig) -> EventBus {
    if config.history_size == 0 {
        return EventBus::new();
    }
    EventBus::with_history(HistoryLimits {
        max_size: config.history_size,
        max_age: (config.history_max_age_secs > 0)
            .then(|| Duration::from_secs(config.history_max_age_secs)),
    })
}
