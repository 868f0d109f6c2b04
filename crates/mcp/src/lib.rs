//! Protocol gateway: sessions with MCP-style capability providers.
//!
//! - JSON-RPC 2.0 over stdio (`transport`) and streamable HTTP (`http_transport`)
//! - Protocol handshake and tool calls (`client`)
//! - In-process providers (`local`)
//! - Bounded session pool with idle eviction (`pool`)
//! - Argument validation against tool input schemas (`schema`)
//! - Provider lifecycle and invocation routing (`gateway`)

pub mod client;
pub mod error;
pub mod gateway;
pub mod http_transport;
pub mod local;
pub mod pool;
pub mod registry;
pub mod schema;
pub mod traits;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

pub use {
    client::{McpClient, McpClientState},
    error::{Error, Result},
    gateway::{GatewaySettings, ProtocolGateway, ProviderStatus},
    local::{LocalClient, LocalProvider, ToolSet},
    pool::{PoolLimits, SessionPool},
    registry::ProviderRegistry,
    traits::{McpClientTrait, McpTransport},
    types::{QUALIFIED_PREFIX, ToolContent, ToolDef, ToolsCallResult, qualified_name, split_qualified},
};
