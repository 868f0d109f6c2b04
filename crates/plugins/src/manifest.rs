//! `PLUGIN.md` manifest parsing.
//!
//! Plugin metadata is TOML frontmatter at the top of `PLUGIN.md`:
//! ```text
//! +++
//! name = "git-tools"
//! version = "1.2.0"
//! description = "Git helpers"
//! provides = ["git"]
//! requires = ["shell"]
//! hot_reload = true
//! priority = 10
//! timeout = 15
//!
//! [commands]
//! git-status = "git status --short"
//!
//! [requirements]
//! os = ["linux", "macos"]
//! bins = ["git"]
//! env = ["GIT_AUTHOR_NAME"]
//! +++
//!
//! # Git tools
//! Extended docs go here.
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// File name looked up inside each plugin directory.
pub const MANIFEST_FILE: &str = "PLUGIN.md";

/// System requirements checked before a plugin is loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRequirements {
    #[serde(default)]
    pub os: Vec<String>,
    #[serde(default)]
    pub bins: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

/// Static identity of a plugin. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Capabilities this plugin makes available once active.
    #[serde(default)]
    pub provides: Vec<String>,
    /// Capabilities that must be available before this plugin loads.
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default, alias = "hotReload")]
    pub hot_reload: bool,
    /// Load ordering: lower loads first.
    #[serde(default)]
    pub priority: i32,
    /// Entry point resolved by the host's [`crate::loader::PluginLoader`].
    /// Without one, the plugin is backed by its `[commands]` table.
    #[serde(default)]
    pub entry: Option<String>,
    /// Command name to shell command line.
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-command timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub requirements: PluginRequirements,
    /// Directory holding the manifest, when loaded from disk.
    #[serde(skip)]
    pub root: Option<PathBuf>,
}

fn default_version() -> String {
    "0.0.0".into()
}

fn default_timeout() -> u64 {
    30
}

impl PluginManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: String::new(),
            provides: Vec::new(),
            requires: Vec::new(),
            hot_reload: false,
            priority: 0,
            entry: None,
            commands: BTreeMap::new(),
            env: HashMap::new(),
            timeout: default_timeout(),
            requirements: PluginRequirements::default(),
            root: None,
        }
    }

    pub(crate) fn validate(&self, path: &Path) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_manifest(path, "name is empty"));
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(Error::invalid_manifest(path, "name contains whitespace"));
        }
        if let Some(cmd) = self.commands.keys().find(|c| c.trim().is_empty()) {
            return Err(Error::invalid_manifest(
                path,
                format!("invalid command name '{cmd}'"),
            ));
        }
        Ok(())
    }
}

/// Parse `PLUGIN.md` content. `path` is the manifest file, used for errors
/// and to set [`PluginManifest::root`].
pub fn parse_plugin_md(content: &str, path: &Path) -> Result<PluginManifest> {
    let trimmed = content.trim_start();
    let Some(after_first) = trimmed.strip_prefix("+++") else {
        return Err(Error::invalid_manifest(
            path,
            "must start with +++ TOML frontmatter",
        ));
    };
    let Some(end) = after_first.find("\n+++") else {
        return Err(Error::invalid_manifest(path, "missing closing +++"));
    };

    let mut manifest: PluginManifest = toml::from_str(after_first[..end].trim())
        .map_err(|e| Error::invalid_manifest(path, e.to_string()))?;
    manifest.validate(path)?;
    manifest.root = path.parent().map(Path::to_path_buf);
    Ok(manifest)
}

/// Read and parse a manifest file from disk.
pub fn read_manifest(path: &Path) -> Result<PluginManifest> {
    let content = std::fs::read_to_string(path)?;
    parse_plugin_md(&content, path)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_manifest() {
        let content = r#"+++
name = "git-tools"
version = "1.2.0"
description = "Git helpers"
provides = ["git"]
requires = ["shell"]
hotReload = true
priority = 10
timeout = 5

[commands]
git-status = "git status --short"

[env]
GIT_PAGER = "cat"

[requirements]
os = ["linux"]
bins = ["git"]
env = ["HOME"]
+++

# Git tools

Body text.
"#;
        let manifest = parse_plugin_md(content, Path::new("/plugins/git/PLUGIN.md")).unwrap();
        assert_eq!(manifest.name, "git-tools");
        assert_eq!(manifest.version, "1.2.0");
        assert_eq!(manifest.provides, vec!["git"]);
        assert_eq!(manifest.requires, vec!["shell"]);
        assert!(manifest.hot_reload);
        assert_eq!(manifest.priority, 10);
        assert_eq!(manifest.timeout, 5);
        assert_eq!(manifest.commands["git-status"], "git status --short");
        assert_eq!(manifest.env["GIT_PAGER"], "cat");
        assert_eq!(manifest.requirements.bins, vec!["git"]);
        assert_eq!(manifest.root.as_deref(), Some(Path::new("/plugins/git")));
    }

    #[test]
    fn parse_minimal_manifest_uses_defaults() {
        let content = "+++\nname = \"minimal\"\n+++\n";
        let manifest = parse_plugin_md(content, Path::new("/tmp/minimal/PLUGIN.md")).unwrap();
        assert_eq!(manifest.version, "0.0.0");
        assert_eq!(manifest.timeout, 30);
        assert_eq!(manifest.priority, 0);
        assert!(!manifest.hot_reload);
        assert!(manifest.entry.is_none());
        assert!(manifest.commands.is_empty());
    }

    #[test]
    fn snake_case_hot_reload_accepted() {
        let content = "+++\nname = \"a\"\nhot_reload = true\n+++\n";
        assert!(parse_plugin_md(content, Path::new("PLUGIN.md")).unwrap().hot_reload);
    }

    #[test]
    fn missing_frontmatter_fails() {
        let err = parse_plugin_md("# no frontmatter", Path::new("PLUGIN.md")).unwrap_err();
        assert!(matches!(err, Error::InvalidManifest { .. }));
    }

    #[test]
    fn unclosed_frontmatter_fails() {
        assert!(parse_plugin_md("+++\nname = \"bad\"\n", Path::new("PLUGIN.md")).is_err());
    }

    #[test]
    fn invalid_names_rejected() {
        for content in ["+++\nname = \"\"\n+++\n", "+++\nname = \"two words\"\n+++\n"] {
            let err = parse_plugin_md(content, Path::new("PLUGIN.md")).unwrap_err();
            assert!(matches!(err, Error::InvalidManifest { .. }), "{err}");
        }
    }
}
