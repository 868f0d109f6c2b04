//! Plugin lifecycle management.
//!
//! ```text
//! Discovered → Loading → Active ⇄ Reloading
//! Loading/Reloading → Failed
//! Active → Unloading → Discovered
//! ```
//!
//! Lifecycle operations on one plugin are serialized by a per-plugin async
//! mutex. The plugin and command tables sit behind short-held `RwLock`s that
//! are never held across an await; plugin code always runs outside them.
//! Lifecycle events are published while the plugin's mutex is held, so a
//! `plugin.*` handler must not drive a lifecycle operation on the same plugin.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    panic::AssertUnwindSafe,
    path::{Path, PathBuf},
    sync::{
        Arc, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    futures::FutureExt,
    serde::Serialize,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use tessera_events::{Event, EventBus, kinds};

#[cfg(feature = "metrics")]
use tessera_metrics::{counter, gauge, labels, plugins as plugin_metrics};

use crate::{
    discovery::{FsPluginDiscoverer, PluginDiscoverer, PluginSource},
    eligibility::check_eligibility,
    error::{Error, Result},
    loader::PluginLoader,
    manifest::{PluginManifest, read_manifest},
    plugin::{CommandHandler, Plugin, PluginContext, PluginLifecycle, PluginStatus},
};

/// Read-only view of a plugin for listings.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub status: PluginStatus,
    pub source: PluginSource,
    pub manifest_path: Option<PathBuf>,
    pub provides: Vec<String>,
    pub requires: Vec<String>,
    pub hot_reload: bool,
    pub priority: i32,
    pub commands: Vec<String>,
    pub subscriptions: usize,
    pub last_error: Option<String>,
}

struct PluginEntry {
    manifest: PluginManifest,
    source: PluginSource,
    manifest_path: Option<PathBuf>,
    declaration: usize,
    status: PluginStatus,
    commands: Vec<String>,
    instance: Option<Arc<dyn Plugin>>,
    last_error: Option<String>,
    lock: Arc<Mutex<()>>,
}

struct CommandEntry {
    plugin: String,
    handler: Arc<dyn CommandHandler>,
}

/// Manages discovery and the load/unload/reload lifecycle of plugins.
pub struct PluginRuntime {
    bus: Arc<EventBus>,
    loader: Arc<dyn PluginLoader>,
    plugins: RwLock<HashMap<String, PluginEntry>>,
    commands: RwLock<HashMap<String, CommandEntry>>,
    builtin_capabilities: RwLock<HashSet<String>>,
    next_declaration: AtomicUsize,
}

impl PluginRuntime {
    pub fn new(bus: Arc<EventBus>, loader: Arc<dyn PluginLoader>) -> Self {
        Self {
            bus,
            loader,
            plugins: RwLock::new(HashMap::new()),
            commands: RwLock::new(HashMap::new()),
            builtin_capabilities: RwLock::new(HashSet::new()),
            next_declaration: AtomicUsize::new(0),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ── Registration ────────────────────────────────────────────────────────

    /// Scan `directories` for `<plugin>/PLUGIN.md` and register every new
    /// manifest as `Discovered`. Returns the names added, in declaration order.
    pub async fn discover(&self, directories: &[PathBuf]) -> Result<Vec<String>> {
        self.discover_with(&FsPluginDiscoverer::new(directories.to_vec()))
            .await
    }

    pub async fn discover_with(&self, discoverer: &dyn PluginDiscoverer) -> Result<Vec<String>> {
        let found = discoverer
            .discover()
            .await
            .map_err(|e| Error::message(format!("plugin discovery failed: {e:#}")))?;
        let mut added = Vec::new();
        for plugin in found {
            let name = plugin.manifest.name.clone();
            if self.insert(plugin.manifest, PluginSource::Directory, Some(plugin.manifest_path)) {
                added.push(name);
            }
        }
        info!(count = added.len(), "discovered plugins");
        Ok(added)
    }

    /// Register a manifest that does not come from a plugin directory.
    /// Returns `Ok(false)` if a plugin with that name already exists.
    pub fn register(&self, manifest: PluginManifest, source: PluginSource) -> Result<bool> {
        manifest.validate(Path::new("<in-process>"))?;
        Ok(self.insert(manifest, source, None))
    }

    fn insert(
        &self,
        manifest: PluginManifest,
        source: PluginSource,
        manifest_path: Option<PathBuf>,
    ) -> bool {
        let mut plugins = self.write_plugins();
        if let Some(existing) = plugins.get(&manifest.name) {
            warn!(
                plugin = %manifest.name,
                kept = ?existing.manifest_path,
                ignored = ?manifest_path,
                "duplicate plugin name, keeping the first definition"
            );
            return false;
        }
        debug!(plugin = %manifest.name, version = %manifest.version, ?source, "plugin registered");
        let name = manifest.name.clone();
        plugins.insert(name, PluginEntry {
            manifest,
            source,
            manifest_path,
            declaration: self.next_declaration.fetch_add(1, Ordering::Relaxed),
            status: PluginStatus::Discovered,
            commands: Vec::new(),
            instance: None,
            last_error: None,
            lock: Arc::new(Mutex::new(())),
        });
        true
    }

    /// Treat `capability` as always available when resolving `requires`.
    pub fn add_builtin_capability(&self, capability: impl Into<String>) {
        self.builtin_capabilities
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(capability.into());
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Load a plugin. Returns `Ok(false)` if it is already active.
    pub async fn load(&self, name: &str) -> Result<bool> {
        let lock = self.plugin_lock(name)?;
        let _guard = lock.lock().await;
        self.load_locked(name).await
    }

    /// Unload a plugin. Returns `Ok(false)` if it is not active.
    pub async fn unload(&self, name: &str) -> Result<bool> {
        let lock = self.plugin_lock(name)?;
        let _guard = lock.lock().await;

        let (manifest, instance) = {
            let mut plugins = self.write_plugins();
            let entry = plugins.get_mut(name).ok_or_else(|| Error::not_found(name))?;
            if entry.status != PluginStatus::Active {
                return Ok(false);
            }
            entry.status = PluginStatus::Unloading;
            (entry.manifest.clone(), entry.instance.take())
        };

        self.teardown_and_revoke(name, instance).await;
        self.update(name, |entry| {
            entry.status = PluginStatus::Discovered;
            entry.last_error = None;
        });
        self.record_active_gauge();
        info!(plugin = name, "plugin unloaded");
        self.publish_lifecycle(kinds::PLUGIN_UNLOADED, &manifest, PluginStatus::Discovered, None)
            .await;
        Ok(true)
    }

    /// Tear the plugin down and load it again from a freshly read manifest.
    ///
    /// Dependents see `plugin.reloading` followed by `plugin.loaded` (or
    /// `plugin.failed`), never `plugin.unloaded`. The plugin's commands are
    /// unavailable while the reload runs; a failed reload leaves it `Failed`.
    pub async fn reload(&self, name: &str) -> Result<bool> {
        let lock = self.plugin_lock(name)?;
        let _guard = lock.lock().await;

        let (manifest, manifest_path, instance) = {
            let mut plugins = self.write_plugins();
            let entry = plugins.get_mut(name).ok_or_else(|| Error::not_found(name))?;
            if !entry.manifest.hot_reload {
                return Err(Error::HotReloadUnsupported {
                    plugin: name.to_string(),
                });
            }
            if entry.status != PluginStatus::Active {
                return Err(Error::InvalidState {
                    plugin: name.to_string(),
                    status: entry.status,
                    operation: "reload",
                });
            }
            entry.status = PluginStatus::Reloading;
            (
                entry.manifest.clone(),
                entry.manifest_path.clone(),
                entry.instance.take(),
            )
        };

        #[cfg(feature = "metrics")]
        counter!(plugin_metrics::RELOADS_TOTAL, labels::PLUGIN => name.to_string()).increment(1);
        info!(plugin = name, "reloading plugin");
        self.publish_lifecycle(kinds::PLUGIN_RELOADING, &manifest, PluginStatus::Reloading, None)
            .await;

        self.teardown_and_revoke(name, instance).await;

        if let Some(path) = manifest_path {
            match read_manifest(&path) {
                Ok(fresh) if fresh.name == name => {
                    self.update(name, |entry| entry.manifest = fresh);
                },
                Ok(fresh) => {
                    let err = Error::invalid_manifest(
                        &path,
                        format!("name changed from '{name}' to '{}'", fresh.name),
                    );
                    return Err(self.fail(name, &manifest, err).await);
                },
                Err(e) => return Err(self.fail(name, &manifest, e).await),
            }
        }

        self.load_locked(name).await
    }

    /// Load several plugins, attempting them in (priority, declaration) order
    /// regardless of the order requested.
    pub async fn load_many(&self, names: &[&str]) -> Vec<(String, Result<bool>)> {
        let mut ordered = Vec::with_capacity(names.len());
        for name in names {
            match self.load_order_key(name) {
                Some(key) => ordered.push((key, (*name).to_string())),
                None => ordered.push(((i32::MAX, usize::MAX), (*name).to_string())),
            }
        }
        ordered.sort();
        ordered.dedup_by(|a, b| a.1 == b.1);

        let mut results = Vec::with_capacity(ordered.len());
        for (_, name) in ordered {
            let result = self.load(&name).await;
            if let Err(e) = &result {
                warn!(plugin = %name, error = %e, "plugin failed to load");
            }
            results.push((name, result));
        }
        results
    }

    /// Load every plugin not yet active, in (priority, declaration) order.
    pub async fn load_all(&self) -> Vec<(String, Result<bool>)> {
        let names: Vec<String> = self
            .read_plugins()
            .iter()
            .filter(|(_, e)| e.status != PluginStatus::Active)
            .map(|(n, _)| n.clone())
            .collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        self.load_many(&refs).await
    }

    /// Unload every active plugin, in reverse load order.
    pub async fn unload_all(&self) -> usize {
        let mut active: Vec<((i32, usize), String)> = self
            .read_plugins()
            .iter()
            .filter(|(_, e)| e.status == PluginStatus::Active)
            .map(|(n, e)| ((e.manifest.priority, e.declaration), n.clone()))
            .collect();
        active.sort();

        let mut unloaded = 0;
        for (_, name) in active.into_iter().rev() {
            match self.unload(&name).await {
                Ok(true) => unloaded += 1,
                Ok(false) => {},
                Err(e) => warn!(plugin = %name, error = %e, "plugin failed to unload"),
            }
        }
        unloaded
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Handler for a command registered by an active plugin.
    pub fn resolve_command(&self, command: &str) -> Option<Arc<dyn CommandHandler>> {
        self.read_commands()
            .get(command)
            .map(|c| Arc::clone(&c.handler))
    }

    pub fn command_owner(&self, command: &str) -> Option<String> {
        self.read_commands().get(command).map(|c| c.plugin.clone())
    }

    /// Registered commands with their owning plugin, sorted by command name.
    pub fn commands(&self) -> Vec<(String, String)> {
        let mut commands: Vec<(String, String)> = self
            .read_commands()
            .iter()
            .map(|(name, c)| (name.clone(), c.plugin.clone()))
            .collect();
        commands.sort();
        commands
    }

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.read_plugins().get(name).map(|e| e.status)
    }

    pub fn info(&self, name: &str) -> Option<PluginInfo> {
        self.read_plugins()
            .get(name)
            .map(|e| self.describe(name, e))
    }

    /// All plugins in (priority, declaration) order.
    pub fn list(&self) -> Vec<PluginInfo> {
        let plugins = self.read_plugins();
        let mut entries: Vec<(&String, &PluginEntry)> = plugins.iter().collect();
        entries.sort_by_key(|(_, e)| (e.manifest.priority, e.declaration));
        entries
            .into_iter()
            .map(|(name, e)| self.describe(name, e))
            .collect()
    }

    /// Built-in capabilities plus everything provided by active plugins.
    pub fn available_capabilities(&self) -> BTreeSet<String> {
        let mut caps: BTreeSet<String> = self
            .builtin_capabilities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        for entry in self.read_plugins().values() {
            if entry.status == PluginStatus::Active {
                caps.extend(entry.manifest.provides.iter().cloned());
            }
        }
        caps
    }

    // ── Internals ───────────────────────────────────────────────────────────

    async fn load_locked(&self, name: &str) -> Result<bool> {
        let (manifest, reloading) = {
            let plugins = self.read_plugins();
            let entry = plugins.get(name).ok_or_else(|| Error::not_found(name))?;
            match entry.status {
                PluginStatus::Active => return Ok(false),
                PluginStatus::Loading | PluginStatus::Unloading => {
                    return Err(Error::InvalidState {
                        plugin: name.to_string(),
                        status: entry.status,
                        operation: "load",
                    });
                },
                PluginStatus::Discovered | PluginStatus::Failed | PluginStatus::Reloading => {},
            }
            (
                entry.manifest.clone(),
                entry.status == PluginStatus::Reloading,
            )
        };

        #[cfg(feature = "metrics")]
        counter!(plugin_metrics::LOADS_TOTAL, labels::PLUGIN => name.to_string()).increment(1);

        // Pre-checks leave a fresh plugin in its current state; a reload that
        // cannot proceed ends in Failed.
        let eligibility = check_eligibility(&manifest.requirements);
        if !eligibility.eligible {
            let err = Error::Ineligible {
                plugin: name.to_string(),
                reasons: eligibility.reasons(),
            };
            return Err(self.reject(name, &manifest, reloading, err).await);
        }

        let missing = self.missing_capabilities(&manifest);
        if !missing.is_empty() {
            let err = Error::UnresolvedDependency {
                plugin: name.to_string(),
                missing,
            };
            return Err(self.reject(name, &manifest, reloading, err).await);
        }

        if !reloading {
            self.update(name, |entry| entry.status = PluginStatus::Loading);
        }
        debug!(plugin = name, version = %manifest.version, "loading plugin");

        let instance = match self.loader.instantiate(&manifest) {
            Ok(instance) => instance,
            Err(e) => {
                let err = Error::plugin_init(name, format!("{e:#}"));
                return Err(self.fail(name, &manifest, err).await);
            },
        };

        let mut ctx = PluginContext::new(name, Arc::clone(&self.bus));
        let init = AssertUnwindSafe(instance.init(&mut ctx)).catch_unwind().await;
        let init_error = match init {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(_) => Some("init panicked".to_string()),
        };
        if let Some(message) = init_error {
            return Err(self.fail(name, &manifest, Error::plugin_init(name, message)).await);
        }

        if let Err(err) = self.commit(name, ctx, &instance) {
            if let Err(e) = instance.teardown().await {
                warn!(plugin = name, error = %e, "teardown after failed commit errored");
            }
            return Err(self.fail(name, &manifest, err).await);
        }

        self.record_active_gauge();
        info!(plugin = name, version = %manifest.version, reloaded = reloading, "plugin active");
        self.publish_lifecycle(kinds::PLUGIN_LOADED, &manifest, PluginStatus::Active, None)
            .await;
        Ok(true)
    }

    /// Make staged registrations visible and mark the plugin `Active`.
    /// Either everything is committed or nothing is.
    ///
    /// Commands and status change under the same pair of write locks, so
    /// readers never see commands of a plugin that is not `Active`.
    fn commit(&self, name: &str, ctx: PluginContext, instance: &Arc<dyn Plugin>) -> Result<()> {
        let PluginContext {
            commands: staged_commands,
            subscriptions,
            ..
        } = ctx;

        if let Some((command, owner)) = command_conflict(name, &self.read_commands(), &staged_commands) {
            return Err(Error::CommandConflict {
                plugin: name.to_string(),
                command,
                owner,
            });
        }

        for staged in subscriptions {
            if let Err(e) = self
                .bus
                .subscribe(&staged.pattern, staged.handler, staged.options)
            {
                self.bus.unsubscribe_all(name);
                return Err(e.into());
            }
        }

        let mut plugins = self.write_plugins();
        let mut commands = self.write_commands();
        if let Some((command, owner)) = command_conflict(name, &commands, &staged_commands) {
            drop(commands);
            drop(plugins);
            self.bus.unsubscribe_all(name);
            return Err(Error::CommandConflict {
                plugin: name.to_string(),
                command,
                owner,
            });
        }

        let names: Vec<String> = staged_commands.iter().map(|(c, _)| c.clone()).collect();
        for (command, handler) in staged_commands {
            commands.insert(command, CommandEntry {
                plugin: name.to_string(),
                handler,
            });
        }
        if let Some(entry) = plugins.get_mut(name) {
            entry.status = PluginStatus::Active;
            entry.instance = Some(Arc::clone(instance));
            entry.last_error = None;
            entry.commands = names;
        }
        Ok(())
    }

    async fn teardown_and_revoke(&self, name: &str, instance: Option<Arc<dyn Plugin>>) {
        if let Some(instance) = instance {
            match AssertUnwindSafe(instance.teardown()).catch_unwind().await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => warn!(plugin = name, error = %e, "plugin teardown failed"),
                Err(_) => warn!(plugin = name, "plugin teardown panicked"),
            }
        }
        self.revoke(name);
    }

    /// Drop every subscription and command owned by `name`.
    fn revoke(&self, name: &str) {
        let subscriptions = self.bus.unsubscribe_all(name);
        let commands = {
            let mut commands = self.write_commands();
            let before = commands.len();
            commands.retain(|_, c| c.plugin != name);
            before - commands.len()
        };
        self.update(name, |entry| entry.commands.clear());
        debug!(plugin = name, subscriptions, commands, "revoked plugin registrations");
    }

    /// Failure before any plugin code ran.
    async fn reject(
        &self,
        name: &str,
        manifest: &PluginManifest,
        reloading: bool,
        err: Error,
    ) -> Error {
        if reloading {
            return self.fail(name, manifest, err).await;
        }
        warn!(plugin = name, error = %err, "plugin not loaded");
        let message = err.to_string();
        self.update(name, |entry| entry.last_error = Some(message.clone()));
        #[cfg(feature = "metrics")]
        counter!(plugin_metrics::LOAD_FAILURES_TOTAL, labels::PLUGIN => name.to_string())
            .increment(1);
        let status = self.status(name).unwrap_or(PluginStatus::Discovered);
        self.publish_lifecycle(kinds::PLUGIN_FAILED, manifest, status, Some(message))
            .await;
        err
    }

    /// Transition to `Failed`, removing anything partially registered.
    async fn fail(&self, name: &str, manifest: &PluginManifest, err: Error) -> Error {
        warn!(plugin = name, error = %err, "plugin failed");
        self.revoke(name);
        let message = err.to_string();
        self.update(name, |entry| {
            entry.status = PluginStatus::Failed;
            entry.instance = None;
            entry.last_error = Some(message.clone());
        });
        #[cfg(feature = "metrics")]
        counter!(plugin_metrics::LOAD_FAILURES_TOTAL, labels::PLUGIN => name.to_string())
            .increment(1);
        self.record_active_gauge();
        self.publish_lifecycle(kinds::PLUGIN_FAILED, manifest, PluginStatus::Failed, Some(message))
            .await;
        err
    }

    fn missing_capabilities(&self, manifest: &PluginManifest) -> Vec<String> {
        if manifest.requires.is_empty() {
            return Vec::new();
        }
        let available = self.available_capabilities();
        manifest
            .requires
            .iter()
            .filter(|cap| !available.contains(cap.as_str()))
            .cloned()
            .collect()
    }

    async fn publish_lifecycle(
        &self,
        kind: &str,
        manifest: &PluginManifest,
        phase: PluginStatus,
        error: Option<String>,
    ) {
        let payload = PluginLifecycle {
            plugin: manifest.name.clone(),
            version: manifest.version.clone(),
            phase,
            error,
        };
        let event = match Event::from_payload(kind, &payload) {
            Ok(event) => event.with_metadata("plugin", manifest.name.clone()),
            Err(e) => {
                warn!(error = %e, "failed to encode lifecycle event");
                return;
            },
        };
        if let Err(e) = self.bus.publish(event).await {
            debug!(event_type = kind, error = %e, "lifecycle event not published");
        }
    }

    fn load_order_key(&self, name: &str) -> Option<(i32, usize)> {
        self.read_plugins()
            .get(name)
            .map(|e| (e.manifest.priority, e.declaration))
    }

    fn plugin_lock(&self, name: &str) -> Result<Arc<Mutex<()>>> {
        self.read_plugins()
            .get(name)
            .map(|e| Arc::clone(&e.lock))
            .ok_or_else(|| Error::not_found(name))
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut PluginEntry)) {
        if let Some(entry) = self.write_plugins().get_mut(name) {
            f(entry);
        }
    }

    fn describe(&self, name: &str, e: &PluginEntry) -> PluginInfo {
        PluginInfo {
            name: name.to_string(),
            version: e.manifest.version.clone(),
            description: e.manifest.description.clone(),
            status: e.status,
            source: e.source,
            manifest_path: e.manifest_path.clone(),
            provides: e.manifest.provides.clone(),
            requires: e.manifest.requires.clone(),
            hot_reload: e.manifest.hot_reload,
            priority: e.manifest.priority,
            commands: e.commands.clone(),
            subscriptions: self.bus.owner_subscription_count(name),
            last_error: e.last_error.clone(),
        }
    }

    fn record_active_gauge(&self) {
        #[cfg(feature = "metrics")]
        {
            let active = self
                .read_plugins()
                .values()
                .filter(|e| e.status == PluginStatus::Active)
                .count();
            gauge!(plugin_metrics::ACTIVE).set(active as f64);
        }
    }

    fn read_plugins(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, PluginEntry>> {
        self.plugins.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_plugins(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, PluginEntry>> {
        self.plugins.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_commands(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CommandEntry>> {
        self.commands.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_commands(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CommandEntry>> {
        self.commands.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// First staged command already owned by another plugin, with its owner.
fn command_conflict(
    name: &str,
    commands: &HashMap<String, CommandEntry>,
    staged: &[(String, Arc<dyn CommandHandler>)],
) -> Option<(String, String)> {
    staged.iter().find_map(|(command, _)| {
        commands
            .get(command)
            .filter(|existing| existing.plugin != name)
            .map(|existing| (command.clone(), existing.plugin.clone()))
    })
}
