//! ProtocolGateway: sessions with every configured provider and the single
//! entry point for capability invocation.
//!
//! All state sits behind one `RwLock`. Process spawning, network I/O and
//! provider calls happen with the lock released.

use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use {
    serde::Serialize,
    serde_json::Value,
    tokio::{
        sync::{Mutex, RwLock},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use tessera_config::{GatewayConfig, ProviderConfig, ProviderTransportConfig, SecurityConstraints};

#[cfg(feature = "metrics")]
use tessera_metrics::{counter, gateway as gateway_metrics, gauge, histogram, labels};

use crate::{
    client::{McpClient, McpClientState},
    error::{Error, Result},
    local::{LocalClient, LocalProvider},
    pool::{PoolLimits, Session, SessionPool, SharedClient},
    registry::ProviderRegistry,
    schema,
    types::{ToolDef, ToolsCallResult, qualified_name, split_qualified},
};

/// Timeouts and pool bounds.
#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    pub max_sessions: usize,
    pub idle_timeout: Duration,
    pub invoke_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for GatewaySettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            max_sessions: config.max_sessions,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            invoke_timeout: Duration::from_secs(config.invoke_timeout_secs),
        }
    }
}

/// Status of a configured provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub transport: &'static str,
    pub enabled: bool,
    /// `connected`, `suspect`, `connecting` or `stopped`.
    pub state: &'static str,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_secs: Option<u64>,
}

struct GatewayInner {
    registry: ProviderRegistry,
    pool: SessionPool,
    /// One connect at a time per provider.
    connecting: HashMap<String, Arc<Mutex<()>>>,
}

/// Manages provider sessions and routes invocations.
pub struct ProtocolGateway {
    inner: RwLock<GatewayInner>,
    settings: GatewaySettings,
}

impl ProtocolGateway {
    pub fn new(registry: ProviderRegistry, settings: GatewaySettings) -> Self {
        Self {
            inner: RwLock::new(GatewayInner {
                registry,
                pool: SessionPool::new(PoolLimits {
                    max_sessions: settings.max_sessions,
                    idle_timeout: settings.idle_timeout,
                }),
                connecting: HashMap::new(),
            }),
            settings,
        }
    }

    pub fn settings(&self) -> GatewaySettings {
        self.settings
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Establish a session with `provider`. Returns `Ok(false)` when a
    /// healthy session already exists.
    pub async fn connect(&self, provider: &str) -> Result<bool> {
        let lock = self.connect_lock(provider).await?;
        let _connecting = lock.lock().await;

        let (config, module, existing) = {
            let inner = self.inner.read().await;
            let config = inner.registry.require(provider)?.clone();
            if !config.enabled {
                return Err(Error::ProviderDisabled {
                    provider: provider.to_string(),
                });
            }
            let module = match &config.transport {
                ProviderTransportConfig::Internal { module } => inner.registry.module(module),
                _ => None,
            };
            let existing = inner
                .pool
                .get(provider)
                .map(|s| (Arc::clone(&s.client), s.suspect));
            (config, module, existing)
        };

        if let Some((client, suspect)) = existing {
            if !suspect && client.read().await.is_alive().await {
                self.inner.write().await.pool.touch(provider, Instant::now());
                return Ok(false);
            }
            debug!(provider, suspect, "replacing unhealthy session");
            let stale = self.inner.write().await.pool.remove(provider);
            if let Some(stale) = stale {
                shutdown_session(provider, stale).await;
            }
        }

        let external = config.transport.is_external();
        if external {
            let evicted = self
                .inner
                .write()
                .await
                .pool
                .reserve(provider, Instant::now())?;
            for (name, session) in evicted {
                info!(provider = %name, "evicting idle session to make room");
                shutdown_session(&name, session).await;
            }
        }

        let session = match self.open_session(&config, module).await {
            Ok(session) => session,
            Err(e) => {
                self.inner.write().await.pool.release(provider);
                return Err(e);
            },
        };
        let tool_count = session.tools.len();

        let (replaced, open) = {
            let mut inner = self.inner.write().await;
            let replaced = inner.pool.insert(provider, session);
            (replaced, inner.pool.len())
        };
        if let Some(replaced) = replaced {
            shutdown_session(provider, replaced).await;
        }

        #[cfg(feature = "metrics")]
        {
            counter!(gateway_metrics::SESSIONS_OPENED_TOTAL, labels::PROVIDER => provider.to_string())
                .increment(1);
            gauge!(gateway_metrics::SESSIONS_OPEN).set(open as f64);
        }
        info!(provider, transport = config.transport.kind(), tools = tool_count, open, "provider connected");
        Ok(true)
    }

    async fn connect_lock(&self, provider: &str) -> Result<Arc<Mutex<()>>> {
        let mut inner = self.inner.write().await;
        inner.registry.require(provider)?;
        Ok(Arc::clone(
            inner.connecting.entry(provider.to_string()).or_default(),
        ))
    }

    async fn open_session(
        &self,
        config: &ProviderConfig,
        module: Option<Arc<dyn LocalProvider>>,
    ) -> Result<Session> {
        let name = config.name.as_str();
        let external = config.transport.is_external();
        let client: SharedClient = match &config.transport {
            ProviderTransportConfig::Internal { module: module_ref } => {
                let provider = module.ok_or_else(|| {
                    Error::unavailable(name, format!("no in-process module '{module_ref}' registered"))
                })?;
                Arc::new(RwLock::new(LocalClient::new(name, provider)))
            },
            ProviderTransportConfig::Subprocess { command, args, env } => {
                let client = McpClient::connect_stdio(name, command, args, env)
                    .await
                    .map_err(|e| Error::unavailable(name, e.to_string()))?;
                Arc::new(RwLock::new(client))
            },
            ProviderTransportConfig::Network { url, auth, headers } => {
                let token = auth.as_ref().map(|a| a.token.clone());
                let client = McpClient::connect_http(name, url, token, headers)
                    .await
                    .map_err(|e| Error::unavailable(name, e.to_string()))?;
                Arc::new(RwLock::new(client))
            },
        };

        let listed = {
            let mut guard = client.write().await;
            tokio::time::timeout(self.settings.invoke_timeout, guard.list_tools())
                .await
                .map(|r| r.map(<[ToolDef]>::to_vec))
        };
        let tools = match listed {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                client.write().await.shutdown().await;
                return Err(Error::unavailable(name, format!("tools/list failed: {e}")));
            },
            Err(_) => {
                client.write().await.shutdown().await;
                return Err(Error::unavailable(name, "tools/list timed out"));
            },
        };
        Ok(Session::new(client, tools, external, Instant::now()))
    }

    /// Close the session with `provider`. Returns `Ok(false)` if none was
    /// open.
    pub async fn disconnect(&self, provider: &str) -> Result<bool> {
        let lock = self.connect_lock(provider).await?;
        let _connecting = lock.lock().await;

        let session = self.inner.write().await.pool.remove(provider);
        match session {
            Some(session) => {
                shutdown_session(provider, session).await;
                self.record_open_gauge().await;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    /// Session handle and cached tools, connecting on demand and replacing
    /// suspect sessions.
    async fn session(&self, provider: &str) -> Result<(SharedClient, Vec<ToolDef>)> {
        {
            let mut inner = self.inner.write().await;
            inner.registry.require(provider)?;
            if let Some(session) = inner.pool.get_mut(provider)
                && !session.suspect
            {
                session.last_used = Instant::now();
                return Ok((Arc::clone(&session.client), session.tools.clone()));
            }
        }
        self.connect(provider).await?;
        let inner = self.inner.read().await;
        inner
            .pool
            .get(provider)
            .map(|s| (Arc::clone(&s.client), s.tools.clone()))
            .ok_or_else(|| Error::unavailable(provider, "session closed during connect"))
    }

    // ── Capabilities ────────────────────────────────────────────────

    /// Tools offered by `provider`, connecting on demand.
    pub async fn list_capabilities(&self, provider: &str) -> Result<Vec<ToolDef>> {
        self.session(provider).await.map(|(_, tools)| tools)
    }

    /// Qualified names (`mcp__<provider>__<tool>`) of every tool on an open
    /// session.
    pub async fn qualified_tools(&self) -> Vec<(String, ToolDef)> {
        let inner = self.inner.read().await;
        let mut tools: Vec<(String, ToolDef)> = inner
            .pool
            .names()
            .into_iter()
            .filter_map(|name| inner.pool.get(&name).map(|s| (name, s.tools.clone())))
            .flat_map(|(name, defs)| {
                defs.into_iter()
                    .map(move |def| (qualified_name(&name, &def.name), def))
            })
            .collect();
        tools.sort_by(|a, b| a.0.cmp(&b.0));
        tools
    }

    /// Invoke `tool` on `provider`.
    ///
    /// Arguments are checked against the tool's input schema and the
    /// provider's security constraints before the provider sees them.
    /// Failures the provider reports come back as `is_error` results;
    /// `Err` means the call never produced a result.
    pub async fn invoke(&self, provider: &str, tool: &str, arguments: Value) -> Result<ToolsCallResult> {
        let (client, tools) = self.session(provider).await?;
        let def = tools
            .iter()
            .find(|t| t.name == tool)
            .ok_or_else(|| Error::ToolNotFound {
                provider: provider.to_string(),
                tool: tool.to_string(),
            })?;

        let violations = schema::validate(&def.input_schema, &arguments);
        if !violations.is_empty() {
            #[cfg(feature = "metrics")]
            counter!(gateway_metrics::INVALID_ARGUMENTS_TOTAL, labels::PROVIDER => provider.to_string(), labels::TOOL => tool.to_string())
                .increment(1);
            debug!(provider, tool, ?violations, "arguments rejected");
            return Err(Error::InvalidArguments {
                provider: provider.to_string(),
                tool: tool.to_string(),
                violations,
            });
        }

        let constraints = {
            let inner = self.inner.read().await;
            inner
                .registry
                .get(provider)
                .and_then(|c| c.security_constraints.clone())
        };
        if let Some(constraints) = constraints {
            enforce_constraints(provider, tool, &constraints, &arguments)?;
        }

        #[cfg(feature = "metrics")]
        let started = Instant::now();
        #[cfg(feature = "metrics")]
        counter!(gateway_metrics::INVOCATIONS_TOTAL, labels::PROVIDER => provider.to_string(), labels::TOOL => tool.to_string())
            .increment(1);

        let timeout = self.settings.invoke_timeout;
        let outcome = tokio::time::timeout(timeout, async {
            client.read().await.call_tool(tool, arguments).await
        })
        .await;

        #[cfg(feature = "metrics")]
        histogram!(gateway_metrics::INVOCATION_DURATION_SECONDS, labels::PROVIDER => provider.to_string())
            .record(started.elapsed().as_secs_f64());

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(provider, tool, error = %e, "invocation failed, session marked suspect");
                self.inner.write().await.pool.mark_suspect(provider);
                return Err(match e {
                    e @ Error::ProviderUnavailable { .. } => e,
                    e => Error::unavailable(provider, e.to_string()),
                });
            },
            Err(_) => {
                #[cfg(feature = "metrics")]
                counter!(gateway_metrics::TIMEOUTS_TOTAL, labels::PROVIDER => provider.to_string())
                    .increment(1);
                warn!(provider, tool, ?timeout, "invocation timed out, session marked suspect");
                self.inner.write().await.pool.mark_suspect(provider);
                return Err(Error::Timeout {
                    provider: provider.to_string(),
                    tool: tool.to_string(),
                    timeout,
                });
            },
        };

        if result.is_error {
            #[cfg(feature = "metrics")]
            counter!(gateway_metrics::INVOCATION_ERRORS_TOTAL, labels::PROVIDER => provider.to_string(), labels::TOOL => tool.to_string())
                .increment(1);
            debug!(provider, tool, "provider returned an error result");
        }
        self.inner.write().await.pool.touch(provider, Instant::now());
        Ok(result)
    }

    /// [`Self::invoke`] with every error folded into an `is_error` result.
    pub async fn invoke_or_error_result(
        &self,
        provider: &str,
        tool: &str,
        arguments: Value,
    ) -> ToolsCallResult {
        match self.invoke(provider, tool, arguments).await {
            Ok(result) => result,
            Err(e) => ToolsCallResult::error(e.to_string()),
        }
    }

    /// Invoke by qualified name `mcp__<provider>__<tool>`.
    pub async fn invoke_qualified(&self, name: &str, arguments: Value) -> Result<ToolsCallResult> {
        let (provider, tool) = split_qualified(name)
            .ok_or_else(|| Error::message(format!("'{name}' is not a qualified tool name")))?;
        self.invoke(provider, tool, arguments).await
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Connect every enabled provider. Failures are logged and skipped.
    pub async fn start_enabled(&self) -> Vec<String> {
        let names: Vec<String> = {
            let inner = self.inner.read().await;
            inner
                .registry
                .enabled_providers()
                .into_iter()
                .map(|p| p.name.clone())
                .collect()
        };
        let mut started = Vec::new();
        for name in names {
            match self.connect(&name).await {
                Ok(_) => started.push(name),
                Err(e) => warn!(provider = %name, error = %e, "failed to start provider"),
            }
        }
        started
    }

    /// Close every session.
    pub async fn shutdown_all(&self) {
        let sessions = self.inner.write().await.pool.drain();
        for (name, session) in sessions {
            shutdown_session(&name, session).await;
        }
        self.record_open_gauge().await;
    }

    /// Enable a provider and connect it. Returns `Ok(false)` if it was
    /// already enabled.
    pub async fn enable(&self, provider: &str) -> Result<bool> {
        let changed = self.inner.write().await.registry.enable(provider)?;
        if changed {
            self.connect(provider).await?;
        }
        Ok(changed)
    }

    /// Disable a provider and close its session. Returns `Ok(false)` if it
    /// was already disabled.
    pub async fn disable(&self, provider: &str) -> Result<bool> {
        self.disconnect(provider).await?;
        self.inner.write().await.registry.disable(provider)
    }

    /// Close idle external sessions. Returns how many were closed.
    pub async fn reap_idle(&self) -> usize {
        let idle = self.inner.write().await.pool.take_idle(Instant::now());
        let count = idle.len();
        for (name, session) in idle {
            debug!(provider = %name, "closing idle session");
            shutdown_session(&name, session).await;
        }
        if count > 0 {
            self.record_open_gauge().await;
        }
        count
    }

    /// Run [`Self::reap_idle`] every `interval` until the gateway is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(gateway) = weak.upgrade() else {
                    break;
                };
                let closed = gateway.reap_idle().await;
                if closed > 0 {
                    info!(closed, "reaped idle provider sessions");
                }
            }
        })
    }

    // ── Registry ────────────────────────────────────────────────────

    pub async fn add_provider(&self, config: ProviderConfig) {
        self.inner.write().await.registry.add(config);
    }

    /// Remove a provider and close its session.
    pub async fn remove_provider(&self, provider: &str) -> bool {
        let (removed, session) = {
            let mut inner = self.inner.write().await;
            inner.connecting.remove(provider);
            (inner.registry.remove(provider), inner.pool.remove(provider))
        };
        if let Some(session) = session {
            shutdown_session(provider, session).await;
        }
        removed
    }

    pub async fn register_module(&self, module: &str, provider: Arc<dyn LocalProvider>) {
        self.inner
            .write()
            .await
            .registry
            .register_module(module, provider);
    }

    pub async fn provider_names(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .registry
            .names()
            .map(String::from)
            .collect()
    }

    pub async fn status_all(&self) -> Vec<ProviderStatus> {
        let inner = self.inner.read().await;
        let now = Instant::now();
        let mut statuses = Vec::new();
        for config in inner.registry.providers() {
            let (state, tool_count, idle_secs) = match inner.pool.get(&config.name) {
                Some(session) => {
                    let state = if session.suspect {
                        "suspect"
                    } else {
                        match session.client.try_read().map(|c| c.state()) {
                            Ok(McpClientState::Closed) => "stopped",
                            Ok(McpClientState::Connected) => "connecting",
                            Ok(McpClientState::Ready) | Err(_) => "connected",
                        }
                    };
                    let idle = now.saturating_duration_since(session.last_used).as_secs();
                    (state, session.tools.len(), Some(idle))
                },
                None if inner.pool.is_reserved(&config.name) => ("connecting", 0, None),
                None => ("stopped", 0, None),
            };
            statuses.push(ProviderStatus {
                name: config.name.clone(),
                transport: config.transport.kind(),
                enabled: config.enabled,
                state,
                tool_count,
                idle_secs,
            });
        }
        statuses
    }

    pub async fn status(&self, provider: &str) -> Option<ProviderStatus> {
        self.status_all()
            .await
            .into_iter()
            .find(|s| s.name == provider)
    }

    async fn record_open_gauge(&self) {
        #[cfg(feature = "metrics")]
        {
            let open = self.inner.read().await.pool.len();
            gauge!(gateway_metrics::SESSIONS_OPEN).set(open as f64);
        }
    }
}

async fn shutdown_session(provider: &str, session: Session) {
    debug!(provider, "closing provider session");
    session.client.write().await.shutdown().await;
}

/// Check path arguments against the provider's allowed roots.
///
/// Paths are normalized lexically; relative paths resolve against the first
/// allowed root. An empty root list allows everything.
fn enforce_constraints(
    provider: &str,
    tool: &str,
    constraints: &SecurityConstraints,
    arguments: &Value,
) -> Result<()> {
    let Some(first_root) = constraints.allowed_roots.first() else {
        return Ok(());
    };
    let roots: Vec<PathBuf> = constraints
        .allowed_roots
        .iter()
        .map(|r| normalize(r))
        .collect();

    let violation = |argument: &str, reason: String| Error::ConstraintViolation {
        provider: provider.to_string(),
        tool: tool.to_string(),
        argument: argument.to_string(),
        reason,
    };

    for name in &constraints.path_arguments {
        let candidates: Vec<&str> = match arguments.get(name) {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            Some(Value::Null) | None => continue,
            Some(_) => return Err(violation(name, "path argument must be a string".into())),
        };
        for raw in candidates {
            let path = Path::new(raw);
            let resolved = if path.is_absolute() {
                normalize(path)
            } else {
                normalize(&first_root.join(path))
            };
            if !roots.iter().any(|root| resolved.starts_with(root)) {
                return Err(violation(
                    name,
                    format!("'{raw}' is outside the allowed roots"),
                ));
            }
        }
    }
    Ok(())
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                out.pop();
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
