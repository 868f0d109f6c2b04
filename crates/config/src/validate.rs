//! Configuration validation.
//!
//! Checks a config document against the known schema, detects unknown or
//! misspelled fields, and reports semantic problems (duplicate providers,
//! dangling default provider, unusable transports, security warnings).

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use serde_json::Value;

use crate::{
    loader::{find_config_file, parse_config_value},
    schema::{ProviderTransportConfig, TesseraConfig},
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "provider",
    /// "gateway", "security", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "providers[1].url"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Array(Box<KnownKeys>),
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Array, Leaf, Struct};

    let provider = Struct(HashMap::from([
        ("name", Leaf),
        ("type", Leaf),
        ("enabled", Leaf),
        ("module", Leaf),
        ("command", Leaf),
        ("args", Leaf),
        ("env", Leaf),
        ("url", Leaf),
        ("auth", Struct(HashMap::from([("token", Leaf)]))),
        ("headers", Leaf),
        (
            "security_constraints",
            Struct(HashMap::from([
                ("allowed_roots", Leaf),
                ("path_arguments", Leaf),
            ])),
        ),
    ]));

    Struct(HashMap::from([
        (
            "events",
            Struct(HashMap::from([
                ("history_size", Leaf),
                ("history_max_age_secs", Leaf),
            ])),
        ),
        (
            "plugins",
            Struct(HashMap::from([
                ("dirs", Leaf),
                ("autoload", Leaf),
                ("disabled", Leaf),
                ("builtin_capabilities", Leaf),
                ("command_log", Leaf),
            ])),
        ),
        (
            "gateway",
            Struct(HashMap::from([
                ("max_sessions", Leaf),
                ("idle_timeout_secs", Leaf),
                ("invoke_timeout_secs", Leaf),
                ("default_provider", Leaf),
            ])),
        ),
        ("providers", Array(Box::new(provider))),
    ]))
}

/// Levenshtein edit distance.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered config file
/// when `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path.map(Path::to_path_buf).or_else(find_config_file);

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(raw) => validate_str(&crate::env_subst::substitute_env(&raw), &actual_path),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate raw config text. The format is taken from `path`'s extension;
/// nothing is read from disk.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let value = match parse_config_value(raw, path) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    match serde_json::from_value::<TesseraConfig>(value) {
        Ok(config) => diagnostics.extend(validate_config(&config).diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Semantic checks on an already parsed config.
#[must_use]
pub fn validate_config(config: &TesseraConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    check_gateway(config, &mut diagnostics);
    check_providers(config, &mut diagnostics);
    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match (value, schema) {
        (Value::Object(map), KnownKeys::Struct(fields)) => {
            let known_keys: Vec<&str> = fields.keys().copied().collect();
            for (key, child_value) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                if let Some(child_schema) = fields.get(key.as_str()) {
                    check_unknown_fields(child_value, child_schema, &path, diagnostics);
                    continue;
                }
                let level = if prefix.is_empty() {
                    " at top level"
                } else {
                    ""
                };
                let message = match suggest(key, &known_keys, 3) {
                    Some(s) => format!("unknown field{level} (did you mean \"{s}\"?)"),
                    None => format!("unknown field{level}"),
                };
                diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "unknown-field",
                    path,
                    message,
                });
            }
        },
        (Value::Array(items), KnownKeys::Array(item_schema)) => {
            for (i, item) in items.iter().enumerate() {
                check_unknown_fields(item, item_schema, &format!("{prefix}[{i}]"), diagnostics);
            }
        },
        // Leaf or type mismatch; type errors are reported by deserialization.
        _ => {},
    }
}

fn check_gateway(config: &TesseraConfig, diagnostics: &mut Vec<Diagnostic>) {
    let gateway = &config.gateway;
    if gateway.max_sessions == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "gateway",
            path: "gateway.max_sessions".into(),
            message: "max_sessions must be at least 1".into(),
        });
    }
    if gateway.invoke_timeout_secs == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "gateway",
            path: "gateway.invoke_timeout_secs".into(),
            message: "invoke_timeout_secs must be at least 1".into(),
        });
    }
    if let Some(default) = &gateway.default_provider {
        match config.provider(default) {
            None => diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "gateway",
                path: "gateway.default_provider".into(),
                message: format!("default provider \"{default}\" is not configured"),
            }),
            Some(p) if !p.enabled => diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                category: "gateway",
                path: "gateway.default_provider".into(),
                message: format!("default provider \"{default}\" is disabled"),
            }),
            Some(_) => {},
        }
    }
}

fn check_providers(config: &TesseraConfig, diagnostics: &mut Vec<Diagnostic>) {
    let mut seen = HashSet::new();
    for (i, provider) in config.providers.iter().enumerate() {
        let path = format!("providers[{i}]");

        if provider.name.trim().is_empty() {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "provider",
                path: format!("{path}.name"),
                message: "provider name is empty".into(),
            });
        } else if provider.name.contains("__") {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "provider",
                path: format!("{path}.name"),
                message: "provider names may not contain \"__\"".into(),
            });
        }
        if !seen.insert(provider.name.as_str()) {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "provider",
                path: format!("{path}.name"),
                message: format!("duplicate provider name \"{}\"", provider.name),
            });
        }

        match &provider.transport {
            ProviderTransportConfig::Internal { module } if module.trim().is_empty() => {
                diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "provider",
                    path: format!("{path}.module"),
                    message: "internal provider needs a module".into(),
                });
            },
            ProviderTransportConfig::Subprocess { command, .. } if command.trim().is_empty() => {
                diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "provider",
                    path: format!("{path}.command"),
                    message: "subprocess provider needs a command".into(),
                });
            },
            ProviderTransportConfig::Network { url, auth, .. } => {
                check_network_url(url, auth.is_some(), &path, diagnostics);
            },
            _ => {},
        }

        if let Some(constraints) = &provider.security_constraints {
            if constraints.allowed_roots.is_empty() {
                diagnostics.push(Diagnostic {
                    severity: Severity::Warning,
                    category: "security",
                    path: format!("{path}.security_constraints.allowed_roots"),
                    message: "no allowed roots: every path argument will be rejected".into(),
                });
            }
            for root in &constraints.allowed_roots {
                if root.is_relative() {
                    diagnostics.push(Diagnostic {
                        severity: Severity::Warning,
                        category: "security",
                        path: format!("{path}.security_constraints.allowed_roots"),
                        message: format!(
                            "relative root \"{}\" is resolved against the working directory",
                            root.display()
                        ),
                    });
                }
            }
        }
    }
}

fn check_network_url(raw: &str, has_auth: bool, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let url = match url::Url::parse(raw) {
        Ok(url) => url,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "provider",
                path: format!("{path}.url"),
                message: format!("invalid url \"{raw}\": {e}"),
            });
            return;
        },
    };
    if !matches!(url.scheme(), "http" | "https") {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "provider",
            path: format!("{path}.url"),
            message: format!("unsupported url scheme \"{}\"", url.scheme()),
        });
        return;
    }
    let local = matches!(
        url.host_str(),
        Some("localhost" | "127.0.0.1" | "[::1]" | "::1")
    );
    if has_auth && url.scheme() == "http" && !local {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "security",
            path: format!("{path}.auth"),
            message: "bearer token is sent over plain http".into(),
        });
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn toml(raw: &str) -> ValidationResult {
        validate_str(raw, Path::new("tessera.toml"))
    }

    fn find<'a>(result: &'a ValidationResult, category: &str, path: &str) -> Option<&'a Diagnostic> {
        result
            .diagnostics
            .iter()
            .find(|d| d.category == category && d.path == path)
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("gateway", "gateway"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("gatway", "gateway"), 1);
        assert_eq!(levenshtein("plugns", "plugins"), 1);
    }

    #[test]
    fn empty_config_is_clean() {
        let result = toml("");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn unknown_top_level_key_with_suggestion() {
        let result = toml("[gatway]\nmax_sessions = 2\n");
        let d = find(&result, "unknown-field", "gatway").unwrap();
        assert_eq!(d.severity, Severity::Error);
        assert!(d.message.contains("gateway"), "{}", d.message);
    }

    #[test]
    fn unknown_provider_key_is_flagged_with_index() {
        let result = toml(
            r#"
            [[providers]]
            name = "fs"
            type = "subprocess"
            command = "fs-server"
            comand_args = []
            "#,
        );
        assert!(find(&result, "unknown-field", "providers[0].comand_args").is_some());
    }

    #[test]
    fn syntax_error_short_circuits() {
        let result = toml("[gateway\n");
        assert!(result.has_errors());
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn type_error_reported() {
        let result = toml("[gateway]\nmax_sessions = \"many\"\n");
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn duplicate_and_dangling_default_provider() {
        let result = toml(
            r#"
            [gateway]
            default_provider = "missing"

            [[providers]]
            name = "git"
            type = "internal"
            module = "git"

            [[providers]]
            name = "git"
            type = "internal"
            module = "git2"
            "#,
        );
        assert!(find(&result, "provider", "providers[1].name").is_some());
        assert!(find(&result, "gateway", "gateway.default_provider").is_some());
        assert_eq!(result.count(Severity::Error), 2);
    }

    #[test]
    fn disabled_default_provider_is_a_warning() {
        let result = toml(
            r#"
            [gateway]
            default_provider = "git"

            [[providers]]
            name = "git"
            type = "internal"
            module = "git"
            enabled = false
            "#,
        );
        let d = find(&result, "gateway", "gateway.default_provider").unwrap();
        assert_eq!(d.severity, Severity::Warning);
        assert!(!result.has_errors());
    }

    #[test]
    fn zero_pool_size_and_timeout_rejected() {
        let result = toml("[gateway]\nmax_sessions = 0\ninvoke_timeout_secs = 0\n");
        assert!(find(&result, "gateway", "gateway.max_sessions").is_some());
        assert!(find(&result, "gateway", "gateway.invoke_timeout_secs").is_some());
    }

    #[test]
    fn transport_parameters_checked() {
        let result = toml(
            r#"
            [[providers]]
            name = "a"
            type = "subprocess"
            command = " "

            [[providers]]
            name = "b"
            type = "network"
            url = "not a url"

            [[providers]]
            name = "c"
            type = "network"
            url = "http://tools.example.com/mcp"
            auth = { token = "t" }
            "#,
        );
        assert!(find(&result, "provider", "providers[0].command").is_some());
        assert!(find(&result, "provider", "providers[1].url").is_some());
        let d = find(&result, "security", "providers[2].auth").unwrap();
        assert_eq!(d.severity, Severity::Warning);
    }

    #[test]
    fn security_constraint_warnings() {
        let result = toml(
            r#"
            [[providers]]
            name = "fs"
            type = "subprocess"
            command = "fs-server"
            security_constraints = { allowed_roots = ["work"] }
            "#,
        );
        let d = find(
            &result,
            "security",
            "providers[0].security_constraints.allowed_roots",
        )
        .unwrap();
        assert!(d.message.contains("relative root"));
    }

    #[test]
    fn validates_yaml_documents() {
        let result = validate_str(
            "gateway:\n  max_sesions: 4\n",
            Path::new("tessera.yaml"),
        );
        let d = find(&result, "unknown-field", "gateway.max_sesions").unwrap();
        assert!(d.message.contains("max_sessions"));
    }

    #[test]
    fn validate_missing_file_reports_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.toml");
        let result = validate(Some(&path));
        assert!(result.has_errors());
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
    }
}
