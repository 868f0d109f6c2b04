use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::TesseraConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "tessera.toml",
    "tessera.yaml",
    "tessera.yml",
    "tessera.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<TesseraConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Load a config file as an untyped JSON value, after env substitution.
pub fn load_config_value(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config_value(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./tessera.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/tessera/tessera.{toml,yaml,yml,json}` (user-global)
///
/// Returns `TesseraConfig::default()` if no config file is found or it fails
/// to parse.
pub fn discover_and_load() -> TesseraConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    TesseraConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    find_config_in(Path::new(".")).or_else(|| config_dir().and_then(|dir| find_config_in(&dir)))
}

fn find_config_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "tessera")
}

/// Returns the user-global config directory (`~/.config/tessera/`).
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().to_path_buf())
}

/// Returns the user data directory (`~/.local/share/tessera/`).
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.data_dir().to_path_buf())
}

/// Plugin directories in search order: project-local `.tessera/plugins`,
/// the user `plugins/` directory, then `extra`.
pub fn plugin_dirs(extra: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(".tessera").join("plugins")];
    if let Some(data) = data_dir() {
        dirs.push(data.join("plugins"));
    }
    dirs.extend(extra.iter().cloned());
    dirs
}

fn format_of(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<TesseraConfig> {
    match format_of(path) {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        ext => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

pub(crate) fn parse_config_value(raw: &str, path: &Path) -> anyhow::Result<serde_json::Value> {
    match format_of(path) {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        ext => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_toml_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("tessera.toml");
        std::fs::write(&toml_path, "[gateway]\nmax_sessions = 3\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().gateway.max_sessions, 3);

        let yaml_path = dir.path().join("tessera.yaml");
        std::fs::write(
            &yaml_path,
            "providers:\n  - name: fs\n    type: subprocess\n    command: fs-server\n",
        )
        .unwrap();
        let cfg = load_config(&yaml_path).unwrap();
        assert_eq!(cfg.providers[0].name, "fs");

        let json_path = dir.path().join("tessera.json");
        std::fs::write(&json_path, r#"{"events": {"history_size": 4}}"#).unwrap();
        assert_eq!(load_config(&json_path).unwrap().events.history_size, 4);
    }

    #[test]
    fn substitutes_env_before_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.toml");
        std::fs::write(
            &path,
            "[gateway]\ndefault_provider = \"${TESSERA_LOADER_UNSET_VAR:-git}\"\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.gateway.default_provider.as_deref(), Some("git"));
    }

    #[test]
    fn unsupported_extension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.ini");
        std::fs::write(&path, "x=1").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn finds_first_config_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_config_in(dir.path()).is_none());
        std::fs::write(dir.path().join("tessera.json"), "{}").unwrap();
        std::fs::write(dir.path().join("tessera.toml"), "").unwrap();
        assert_eq!(
            find_config_in(dir.path()).unwrap(),
            dir.path().join("tessera.toml")
        );
    }

    #[test]
    fn plugin_dirs_end_with_extras() {
        let extra = PathBuf::from("/opt/tessera/plugins");
        let dirs = plugin_dirs(std::slice::from_ref(&extra));
        assert_eq!(dirs.first().unwrap(), &PathBuf::from(".tessera/plugins"));
        assert_eq!(dirs.last().unwrap(), &extra);
    }
}
