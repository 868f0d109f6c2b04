//! Command routing.
//!
//! A command resolves, in order, to a command registered by an active plugin,
//! to a gateway tool named `mcp__<provider>__<tool>`, or to a tool of the same
//! name on the configured default provider. Every execution, successful or
//! not, is published as a `command.executed` event.

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc, time::Instant};

use {
    futures::FutureExt,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{debug, info, warn},
};

use {
    tessera_common::panic_message,
    tessera_events::{Event, EventBus, kinds},
    tessera_mcp::{ProtocolGateway, split_qualified},
    tessera_plugins::PluginRuntime,
};

#[cfg(feature = "metrics")]
use tessera_metrics::{commands as command_metrics, counter, histogram, labels};

/// Outcome of [`CommandDispatcher::execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Where a command is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRoute {
    Plugin { plugin: String },
    Tool { provider: String, tool: String },
}

impl CommandRoute {
    fn label(&self) -> &'static str {
        match self {
            Self::Plugin { .. } => "plugin",
            Self::Tool { .. } => "tool",
        }
    }
}

/// Payload of `command.executed`.
#[derive(Serialize)]
struct CommandExecuted<'a> {
    command: &'a str,
    success: bool,
    output: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    duration_ms: u64,
    metadata: &'a HashMap<String, String>,
}

pub struct CommandDispatcher {
    runtime: Arc<PluginRuntime>,
    gateway: Arc<ProtocolGateway>,
    default_provider: Option<String>,
}

impl CommandDispatcher {
    pub fn new(runtime: Arc<PluginRuntime>, gateway: Arc<ProtocolGateway>) -> Self {
        Self {
            runtime,
            gateway,
            default_provider: None,
        }
    }

    #[must_use]
    pub fn with_default_provider(mut self, provider: Option<String>) -> Self {
        self.default_provider = provider;
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        self.runtime.bus()
    }

    pub fn route(&self, command: &str) -> Option<CommandRoute> {
        if let Some(plugin) = self.runtime.command_owner(command) {
            return Some(CommandRoute::Plugin { plugin });
        }
        if let Some((provider, tool)) = split_qualified(command) {
            return Some(CommandRoute::Tool {
                provider: provider.to_string(),
                tool: tool.to_string(),
            });
        }
        self.default_provider
            .as_ref()
            .map(|provider| CommandRoute::Tool {
                provider: provider.clone(),
                tool: command.to_string(),
            })
    }

    pub async fn execute(&self, command: &str, args: Value) -> CommandResult {
        self.execute_with_metadata(command, args, HashMap::new())
            .await
    }

    /// Execute `command`. Never fails: problems are reported through
    /// `CommandResult::error`. `metadata` is forwarded on the published event.
    pub async fn execute_with_metadata(
        &self,
        command: &str,
        args: Value,
        mut metadata: HashMap<String, String>,
    ) -> CommandResult {
        let started = Instant::now();
        let route = self.route(command);

        let outcome = match &route {
            Some(CommandRoute::Plugin { plugin }) => {
                metadata.insert("plugin".into(), plugin.clone());
                match self.runtime.resolve_command(command) {
                    Some(handler) => match AssertUnwindSafe(handler.call(args)).catch_unwind().await {
                        Ok(outcome) => outcome.map_err(|e| format!("{e:#}")),
                        Err(panic) => Err(format!("command panicked: {}", panic_message(panic.as_ref()))),
                    },
                    None => Err(format!("command '{command}' is no longer available")),
                }
            },
            Some(CommandRoute::Tool { provider, tool }) => {
                metadata.insert("provider".into(), provider.clone());
                metadata.insert("tool".into(), tool.clone());
                match self.gateway.invoke(provider, tool, args).await {
                    Ok(result) if result.is_error => Err(result.to_text()),
                    Ok(result) => Ok(result.to_text()),
                    Err(e) => Err(e.to_string()),
                }
            },
            None => Err(format!("unknown command '{command}'")),
        };
        let route_label = route.as_ref().map_or("unresolved", CommandRoute::label);
        metadata.insert("route".into(), route_label.into());

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let result = match outcome {
            Ok(output) => CommandResult {
                success: true,
                output,
                error: None,
                duration_ms,
            },
            Err(error) => CommandResult {
                success: false,
                output: String::new(),
                error: Some(error),
                duration_ms,
            },
        };

        #[cfg(feature = "metrics")]
        {
            counter!(command_metrics::EXECUTED_TOTAL, labels::ROUTE => route_label).increment(1);
            if !result.success {
                counter!(command_metrics::FAILED_TOTAL, labels::ROUTE => route_label).increment(1);
            }
            histogram!(command_metrics::DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        }

        if result.success {
            info!(command, route = route_label, duration_ms, "command executed");
        } else {
            warn!(
                command,
                route = route_label,
                duration_ms,
                error = result.error.as_deref().unwrap_or_default(),
                "command failed"
            );
        }

        self.publish(command, &result, &metadata).await;
        result
    }

    async fn publish(&self, command: &str, result: &CommandResult, metadata: &HashMap<String, String>) {
        let payload = CommandExecuted {
            command,
            success: result.success,
            output: &result.output,
            error: result.error.as_deref(),
            duration_ms: result.duration_ms,
            metadata,
        };
        let event = match Event::from_payload(kinds::COMMAND_EXECUTED, &payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(command, error = %e, "failed to encode command event");
                return;
            },
        };
        let event = metadata
            .iter()
            .fold(event, |event, (k, v)| event.with_metadata(k.clone(), v.clone()));
        if let Err(e) = self.bus().publish(event).await {
            debug!(command, error = %e, "command event not published");
        }
    }
}
