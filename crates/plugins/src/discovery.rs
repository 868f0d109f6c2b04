//! Plugin discovery from filesystem directories.
//!
//! Scans directories for `<dir>/<plugin>/PLUGIN.md` and parses the manifests.
//! No plugin code runs during discovery.

use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::manifest::{MANIFEST_FILE, PluginManifest, read_manifest};

/// Where a plugin definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginSource {
    /// Found by scanning a plugin directory.
    Directory,
    /// Shipped with the host.
    Bundled,
    /// Registered in-process by the embedding application.
    Builtin,
}

/// A manifest found on disk.
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub manifest: PluginManifest,
    /// Path of the `PLUGIN.md` the manifest was read from.
    pub manifest_path: PathBuf,
}

/// Finds plugin manifests.
#[async_trait]
pub trait PluginDiscoverer: Send + Sync {
    async fn discover(&self) -> anyhow::Result<Vec<DiscoveredPlugin>>;
}

/// Filesystem discoverer. Directories are scanned in order; within a
/// directory, plugin folders are visited alphabetically.
pub struct FsPluginDiscoverer {
    search_paths: Vec<PathBuf>,
}

impl FsPluginDiscoverer {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    fn scan_dir(base: &Path, found: &mut Vec<DiscoveredPlugin>) {
        let entries = match std::fs::read_dir(base) {
            Ok(e) => e,
            Err(e) => {
                debug!(dir = %base.display(), error = %e, "skipping plugin directory");
                return;
            },
        };

        let mut plugin_dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.is_dir())
            .collect();
        plugin_dirs.sort();

        for plugin_dir in plugin_dirs {
            let manifest_path = plugin_dir.join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                continue;
            }
            match read_manifest(&manifest_path) {
                Ok(manifest) => found.push(DiscoveredPlugin {
                    manifest,
                    manifest_path,
                }),
                Err(e) => warn!(path = %manifest_path.display(), error = %e, "failed to parse PLUGIN.md"),
            }
        }
    }
}

#[async_trait]
impl PluginDiscoverer for FsPluginDiscoverer {
    async fn discover(&self) -> anyhow::Result<Vec<DiscoveredPlugin>> {
        let mut found = Vec::new();
        for base in &self.search_paths {
            if base.is_dir() {
                Self::scan_dir(base, &mut found);
            }
        }
        Ok(found)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn write_plugin(dir: &Path, folder: &str, body: &str) {
        std::fs::create_dir_all(dir.join(folder)).unwrap();
        std::fs::write(dir.join(folder).join(MANIFEST_FILE), body).unwrap();
    }

    #[tokio::test]
    async fn discovers_plugins_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("project");
        let second = tmp.path().join("user");
        write_plugin(&first, "zeta", "+++\nname = \"zeta\"\n+++\n");
        write_plugin(&first, "alpha", "+++\nname = \"alpha\"\n+++\n");
        write_plugin(&second, "beta", "+++\nname = \"beta\"\n+++\n");

        let discoverer = FsPluginDiscoverer::new(vec![first.clone(), second]);
        let found = discoverer.discover().await.unwrap();
        let names: Vec<_> = found.iter().map(|p| p.manifest.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta", "beta"]);
        assert_eq!(found[0].manifest_path, first.join("alpha").join(MANIFEST_FILE));
    }

    #[tokio::test]
    async fn skips_missing_dirs() {
        let discoverer = FsPluginDiscoverer::new(vec![PathBuf::from("/nonexistent/tessera")]);
        assert!(discoverer.discover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn skips_folders_without_manifest_and_bad_frontmatter() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("not-a-plugin")).unwrap();
        std::fs::write(tmp.path().join("not-a-plugin/README.md"), "hello").unwrap();
        write_plugin(tmp.path(), "broken", "no frontmatter");
        write_plugin(tmp.path(), "ok", "+++\nname = \"ok\"\n+++\n");

        let discoverer = FsPluginDiscoverer::new(vec![tmp.path().to_path_buf()]);
        let found = discoverer.discover().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].manifest.name, "ok");
    }
}
