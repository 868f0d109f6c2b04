//! Configuration loading, env substitution and validation.
//!
//! Config files: `tessera.toml`, `tessera.yaml`, `tessera.yml` or `tessera.json`,
//! searched in `./` then `~/.config/tessera/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution anywhere in
//! the file.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        config_dir, data_dir, discover_and_load, find_config_file, load_config,
        load_config_value, plugin_dirs,
    },
    schema::{
        EventsConfig, GatewayConfig, NetworkAuth, PluginsConfig, ProviderConfig,
        ProviderTransportConfig, SecurityConstraints, TesseraConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config, validate_str},
};
