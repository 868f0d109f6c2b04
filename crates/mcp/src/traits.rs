//! Trait seams between the gateway, the protocol client, and transports.

use {async_trait::async_trait, serde_json::Value};

use crate::{
    client::McpClientState,
    error::Result,
    types::{JsonRpcResponse, ToolDef, ToolsCallResult},
};

/// Transport layer for JSON-RPC communication.
///
/// Implemented by `StdioTransport` (child process) and `HttpTransport`
/// (remote server).
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the response. JSON-RPC error
    /// responses surface as [`crate::Error::Rpc`].
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse>;

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Check if the underlying connection/process is still alive.
    async fn is_alive(&self) -> bool;

    /// Kill/close the underlying connection/process.
    async fn kill(&self);
}

/// A session with one capability provider.
///
/// `McpClient` implements this over a transport; `LocalClient` calls an
/// in-process provider directly.
#[async_trait]
pub trait McpClientTrait: Send + Sync {
    /// The provider this session belongs to.
    fn server_name(&self) -> &str;

    fn state(&self) -> McpClientState;

    /// Cached tool definitions (call `list_tools` first to populate).
    fn tools(&self) -> &[ToolDef];

    /// Fetch the list of tools from the provider, caching the result.
    async fn list_tools(&mut self) -> Result<&[ToolDef]>;

    /// Call a tool. Provider-side failures that the protocol reports as
    /// results come back as `Ok` with `is_error` set.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult>;

    async fn is_alive(&self) -> bool;

    async fn shutdown(&mut self);
}
