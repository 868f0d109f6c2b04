//! Plugin runtime: manifest discovery, eligibility checks, and the
//! load/unload/reload lifecycle.
//!
//! Plugins live in `<dir>/<plugin>/PLUGIN.md` with TOML frontmatter. A plugin
//! either names an `entry` resolved by the host's [`PluginLoader`] or is
//! backed by the shell commands in its `[commands]` table.

pub mod bundled;
pub mod discovery;
pub mod eligibility;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod plugin;
pub mod runtime;
pub mod shell;

pub use {
    discovery::{DiscoveredPlugin, FsPluginDiscoverer, PluginDiscoverer, PluginSource},
    eligibility::{EligibilityResult, check_eligibility},
    error::{Error, Result},
    loader::{DefaultLoader, PluginFactory, PluginLoader},
    manifest::{MANIFEST_FILE, PluginManifest, PluginRequirements, parse_plugin_md, read_manifest},
    plugin::{CommandHandler, Plugin, PluginContext, PluginLifecycle, PluginStatus, command_fn},
    runtime::{PluginInfo, PluginRuntime},
    shell::{ShellCommand, ShellPlugin},
};
