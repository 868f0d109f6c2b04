//! Protocol client: the handshake and tool calls against one provider.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    secrecy::Secret,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Context, Error, Result},
    http_transport::HttpTransport,
    traits::{McpClientTrait, McpTransport},
    transport::StdioTransport,
    types::{
        ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, PROTOCOL_VERSION,
        ToolDef, ToolsCallParams, ToolsCallResult, ToolsListResult,
    },
};

/// State of a provider session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpClientState {
    /// Transport open, handshake not finished.
    Connected,
    /// `initialize` completed and `notifications/initialized` sent.
    Ready,
    /// Shut down or the provider went away.
    Closed,
}

/// A protocol client bound to one transport.
pub struct McpClient {
    server_name: String,
    transport: Arc<dyn McpTransport>,
    state: McpClientState,
    server_info: Option<InitializeResult>,
    tools: Vec<ToolDef>,
}

impl McpClient {
    /// Spawn a provider process and perform the handshake.
    pub async fn connect_stdio(
        server_name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        info!(provider = %server_name, command = %command, "connecting to subprocess provider");
        let transport = StdioTransport::spawn(command, args, env).await?;
        Self::handshake(server_name, transport).await
    }

    /// Connect to a remote provider over HTTP and perform the handshake.
    pub async fn connect_http(
        server_name: &str,
        url: &str,
        token: Option<Secret<String>>,
        headers: &HashMap<String, String>,
    ) -> Result<Self> {
        info!(provider = %server_name, url = %url, "connecting to network provider");
        let transport = HttpTransport::build(url, token, headers, Duration::from_secs(60))?;
        Self::handshake(server_name, transport).await
    }

    /// Run the handshake over an already open transport.
    pub async fn handshake(server_name: &str, transport: Arc<dyn McpTransport>) -> Result<Self> {
        let mut client = Self {
            server_name: server_name.into(),
            transport,
            state: McpClientState::Connected,
            server_info: None,
            tools: Vec::new(),
        };
        if let Err(e) = client.initialize().await {
            warn!(provider = %server_name, error = %e, "initialize handshake failed");
            client.transport.kill().await;
            return Err(e);
        }
        Ok(client)
    }

    async fn initialize(&mut self) -> Result<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "tessera".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let resp = self
            .transport
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await?;
        let result: InitializeResult =
            serde_json::from_value(resp.result.context("initialize returned no result")?)
                .context("failed to parse initialize result")?;

        info!(
            provider = %self.server_name,
            protocol = %result.protocol_version,
            server_name = %result.server_info.name,
            "provider initialized"
        );
        self.server_info = Some(result);

        self.transport
            .notify("notifications/initialized", None)
            .await?;
        self.state = McpClientState::Ready;
        Ok(())
    }

    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state != McpClientState::Ready {
            return Err(Error::unavailable(
                &self.server_name,
                format!("session is not ready (state: {:?})", self.state),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl McpClientTrait for McpClient {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn state(&self) -> McpClientState {
        self.state
    }

    fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    async fn list_tools(&mut self) -> Result<&[ToolDef]> {
        self.ensure_ready()?;
        let resp = self.transport.request("tools/list", None).await?;
        let result: ToolsListResult =
            serde_json::from_value(resp.result.context("tools/list returned no result")?)?;
        debug!(provider = %self.server_name, count = result.tools.len(), "fetched tools");
        self.tools = result.tools;
        Ok(&self.tools)
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolsCallResult> {
        self.ensure_ready()?;
        let params = ToolsCallParams {
            name: name.into(),
            arguments,
        };
        let resp = match self
            .transport
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await
        {
            Ok(resp) => resp,
            // The provider answered; its failure is the tool's result.
            Err(Error::Rpc { code, message, .. }) => {
                return Ok(ToolsCallResult::error(format!(
                    "provider error {code}: {message}"
                )));
            },
            Err(e) => return Err(e),
        };
        let result: ToolsCallResult =
            serde_json::from_value(resp.result.context("tools/call returned no result")?)?;
        Ok(result)
    }

    async fn is_alive(&self) -> bool {
        self.state == McpClientState::Ready && self.transport.is_alive().await
    }

    async fn shutdown(&mut self) {
        self.state = McpClientState::Closed;
        self.transport.kill().await;
    }
}
