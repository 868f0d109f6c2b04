//! In-process capability providers (`type = "internal"`).

use std::{collections::BTreeMap, future::Future, panic::AssertUnwindSafe, pin::Pin, sync::Arc};

use {async_trait::async_trait, futures::FutureExt, serde_json::Value, tessera_common::panic_message};

use crate::{
    client::McpClientState,
    error::{Error, Result},
    traits::McpClientTrait,
    types::{ToolDef, ToolsCallResult},
};

/// A provider living in the host process.
///
/// Errors returned from `call`, and panics inside it, are reported to
/// callers as `is_error` results.
#[async_trait]
pub trait LocalProvider: Send + Sync {
    fn tools(&self) -> Vec<ToolDef>;

    async fn call(&self, tool: &str, arguments: Value) -> anyhow::Result<ToolsCallResult>;
}

type ToolFuture = Pin<Box<dyn Future<Output = anyhow::Result<ToolsCallResult>> + Send>>;
type ToolFn = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// A [`LocalProvider`] assembled from closures.
#[derive(Default)]
pub struct ToolSet {
    tools: BTreeMap<String, (ToolDef, ToolFn)>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tool<F, Fut>(mut self, def: ToolDef, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ToolsCallResult>> + Send + 'static,
    {
        let f: ToolFn = Arc::new(move |args| -> ToolFuture { Box::pin(f(args)) });
        self.tools.insert(def.name.clone(), (def, f));
        self
    }
}

#[async_trait]
impl LocalProvider for ToolSet {
    fn tools(&self) -> Vec<ToolDef> {
        self.tools.values().map(|(def, _)| def.clone()).collect()
    }

    async fn call(&self, tool: &str, arguments: Value) -> anyhow::Result<ToolsCallResult> {
        let Some((_, f)) = self.tools.get(tool) else {
            anyhow::bail!("unknown tool '{tool}'");
        };
        f(arguments).await
    }
}

/// Session adapter giving a [`LocalProvider`] the same surface as a remote
/// provider.
pub struct LocalClient {
    name: String,
    provider: Arc<dyn LocalProvider>,
    state: McpClientState,
    tools: Vec<ToolDef>,
}

impl LocalClient {
    pub fn new(name: &str, provider: Arc<dyn LocalProvider>) -> Self {
        Self {
            name: name.to_string(),
            provider,
            state: McpClientState::Ready,
            tools: Vec::new(),
        }
    }
}

#[async_trait]
impl McpClientTrait for LocalClient {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> McpClientState {
        self.state
    }

    fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    async fn list_tools(&mut self) -> Result<&[ToolDef]> {
        self.tools = self.provider.tools();
        Ok(&self.tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult> {
        if self.state != McpClientState::Ready {
            return Err(Error::unavailable(&self.name, "session closed"));
        }
        match AssertUnwindSafe(self.provider.call(name, arguments)).catch_unwind().await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Ok(ToolsCallResult::error(format!("{e:#}"))),
            Err(panic) => Ok(ToolsCallResult::error(format!(
                "tool '{name}' panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    async fn is_alive(&self) -> bool {
        self.state == McpClientState::Ready
    }

    async fn shutdown(&mut self) {
        self.state = McpClientState::Closed;
    }
}
