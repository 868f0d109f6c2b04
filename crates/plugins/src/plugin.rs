//! The contract between the runtime and plugin code.

use std::{fmt, future::Future, sync::Arc};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use tessera_events::{EventBus, EventHandler, EventPattern, SubscribeOptions};

use crate::error::{Error, Result};

/// Lifecycle state of a plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Discovered,
    Loading,
    Active,
    Reloading,
    Unloading,
    Failed,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::Loading => "loading",
            Self::Active => "active",
            Self::Reloading => "reloading",
            Self::Unloading => "unloading",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Payload of `plugin.*` lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginLifecycle {
    pub plugin: String,
    pub version: String,
    pub phase: PluginStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Code backing a loaded plugin.
///
/// `init` registers commands and subscriptions on the context; nothing is
/// visible to the rest of the system until it returns `Ok`. `teardown` runs on
/// unload and reload; its errors are logged and never block cleanup.
#[async_trait]
pub trait Plugin: Send + Sync {
    async fn init(&self, ctx: &mut PluginContext) -> anyhow::Result<()>;

    async fn teardown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A command a plugin exposes to the dispatcher.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn call(&self, args: Value) -> anyhow::Result<String>;
}

struct FnCommand<F>(F);

#[async_trait]
impl<F, Fut> CommandHandler for FnCommand<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send,
{
    async fn call(&self, args: Value) -> anyhow::Result<String> {
        (self.0)(args).await
    }
}

/// Wrap an async closure as a command handler.
pub fn command_fn<F, Fut>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    Arc::new(FnCommand(f))
}

pub(crate) struct StagedSubscription {
    pub pattern: String,
    pub handler: Arc<dyn EventHandler>,
    pub options: SubscribeOptions,
}

/// Registration surface handed to [`Plugin::init`].
///
/// Commands and subscriptions are staged here and committed by the runtime
/// only after `init` succeeds. Subscriptions are always owned by the plugin.
pub struct PluginContext {
    plugin: String,
    bus: Arc<EventBus>,
    pub(crate) commands: Vec<(String, Arc<dyn CommandHandler>)>,
    pub(crate) subscriptions: Vec<StagedSubscription>,
}

impl PluginContext {
    pub(crate) fn new(plugin: &str, bus: Arc<EventBus>) -> Self {
        Self {
            plugin: plugin.to_string(),
            bus,
            commands: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    /// The bus, for publishing. Subscribe through [`Self::subscribe`] so the
    /// subscription is tied to the plugin's lifecycle.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn register_command(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() || name.chars().any(char::is_whitespace) {
            return Err(Error::message(format!("invalid command name '{name}'")));
        }
        if self.commands.iter().any(|(n, _)| *n == name) {
            return Err(Error::CommandConflict {
                plugin: self.plugin.clone(),
                command: name,
                owner: self.plugin.clone(),
            });
        }
        self.commands.push((name, handler));
        Ok(())
    }

    /// Stage a subscription. The pattern is validated immediately.
    pub fn subscribe(
        &mut self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<()> {
        EventPattern::parse(pattern)?;
        self.subscriptions.push(StagedSubscription {
            pattern: pattern.to_string(),
            handler,
            options: options.owner(self.plugin.clone()),
        });
        Ok(())
    }

    pub fn command_names(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(|(n, _)| n.as_str())
    }
}
