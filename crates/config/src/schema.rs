//! Config schema types (events, plugins, gateway, providers).
use std::{collections::HashMap, path::PathBuf};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    pub events: EventsConfig,
    pub plugins: PluginsConfig,
    pub gateway: GatewayConfig,
    /// Capability providers reachable through the protocol gateway.
    pub providers: Vec<ProviderConfig>,
}

impl TesseraConfig {
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Number of recent events kept for diagnostics. 0 disables the history ring.
    pub history_size: usize,
    /// Drop history entries older than this many seconds. 0 keeps them until
    /// evicted by size.
    pub history_max_age_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            history_size: 256,
            history_max_age_secs: 3600,
        }
    }
}

/// Plugin runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Extra directories scanned for `<name>/PLUGIN.md`, after the project
    /// and user plugin directories.
    pub dirs: Vec<PathBuf>,
    /// Load every discovered plugin at startup.
    pub autoload: bool,
    /// Plugins never loaded automatically.
    pub disabled: Vec<String>,
    /// Capabilities treated as always available when resolving `requires`.
    pub builtin_capabilities: Vec<String>,
    /// When set, the bundled command logger appends executed commands here.
    pub command_log: Option<PathBuf>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            autoload: true,
            disabled: Vec::new(),
            builtin_capabilities: Vec::new(),
            command_log: None,
        }
    }
}

/// Protocol gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Maximum number of concurrently open external provider sessions.
    pub max_sessions: usize,
    /// Sessions unused for this long are recycled.
    pub idle_timeout_secs: u64,
    /// Per-request timeout for external providers.
    pub invoke_timeout_secs: u64,
    /// Provider used for commands that are neither plugin commands nor
    /// qualified `mcp__<provider>__<tool>` names.
    pub default_provider: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_sessions: 8,
            idle_timeout_secs: 300,
            invoke_timeout_secs: 30,
            default_provider: None,
        }
    }
}

/// A single capability provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: ProviderTransportConfig,
    /// Whether this provider is started with the host. Defaults to true.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_constraints: Option<SecurityConstraints>,
}

/// Transport selected by the `type` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderTransportConfig {
    /// In-process provider registered with the host under `module`.
    Internal { module: String },
    /// Child process speaking line-delimited JSON-RPC over stdio.
    Subprocess {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Remote server speaking JSON-RPC over HTTP POST.
    Network {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<NetworkAuth>,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl ProviderTransportConfig {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Internal { .. } => "internal",
            Self::Subprocess { .. } => "subprocess",
            Self::Network { .. } => "network",
        }
    }

    /// Whether the provider lives outside the host process and counts
    /// against the session pool.
    #[must_use]
    pub fn is_external(&self) -> bool {
        !matches!(self, Self::Internal { .. })
    }
}

/// Credentials for network providers.
#[derive(Clone, Serialize, Deserialize)]
pub struct NetworkAuth {
    /// Sent as `Authorization: Bearer <token>`.
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,
}

impl std::fmt::Debug for NetworkAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkAuth")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Limits applied to arguments before a provider sees them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConstraints {
    /// Filesystem roots that path arguments must stay inside.
    pub allowed_roots: Vec<PathBuf>,
    /// Argument names treated as filesystem paths.
    pub path_arguments: Vec<String>,
}

impl Default for SecurityConstraints {
    fn default() -> Self {
        Self {
            allowed_roots: Vec::new(),
            path_arguments: vec!["path".into()],
        }
    }
}

fn default_true() -> bool {
    true
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_document() {
        let config: TesseraConfig = toml::from_str("").unwrap();
        assert_eq!(config.events.history_size, 256);
        assert_eq!(config.gateway.max_sessions, 8);
        assert_eq!(config.gateway.invoke_timeout_secs, 30);
        assert!(config.plugins.autoload);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn parses_each_transport_type() {
        let config: TesseraConfig = toml::from_str(
            r#"
            [[providers]]
            name = "git"
            type = "internal"
            module = "builtin.git"

            [[providers]]
            name = "fs"
            type = "subprocess"
            command = "fs-server"
            args = ["--stdio"]
            enabled = false
            [providers.security_constraints]
            allowed_roots = ["/srv/work"]

            [[providers]]
            name = "remote"
            type = "network"
            url = "https://tools.example.com/mcp"
            auth = { token = "s3cret" }
            headers = { "X-Team" = "core" }
            "#,
        )
        .unwrap();

        assert_eq!(config.providers.len(), 3);
        assert!(matches!(
            &config.providers[0].transport,
            ProviderTransportConfig::Internal { module } if module == "builtin.git"
        ));

        let fs = config.provider("fs").unwrap();
        assert!(!fs.enabled);
        assert_eq!(fs.transport.kind(), "subprocess");
        let constraints = fs.security_constraints.as_ref().unwrap();
        assert_eq!(constraints.allowed_roots, vec![PathBuf::from("/srv/work")]);
        assert_eq!(constraints.path_arguments, vec!["path".to_string()]);

        let ProviderTransportConfig::Network { auth, headers, .. } =
            &config.provider("remote").unwrap().transport
        else {
            panic!("expected network transport");
        };
        assert_eq!(auth.as_ref().unwrap().token.expose_secret(), "s3cret");
        assert_eq!(headers["X-Team"], "core");
    }

    #[test]
    fn auth_token_is_redacted_in_debug() {
        let auth = NetworkAuth {
            token: Secret::new("hunter2".into()),
        };
        assert!(!format!("{auth:?}").contains("hunter2"));
    }

    #[test]
    fn unknown_transport_type_is_rejected() {
        let result: Result<TesseraConfig, _> = toml::from_str(
            r#"
            [[providers]]
            name = "x"
            type = "carrier-pigeon"
            "#,
        );
        assert!(result.is_err());
    }
}
