//! Command-line style arguments turned into a JSON object.

use serde_json::{Map, Value};

use crate::error::{Context, Error, Result};

/// Parse `key=value` pairs into a JSON object.
///
/// Values that parse as JSON (`3`, `true`, `["a"]`) keep their type; anything
/// else is taken as a string. Later keys win.
pub fn parse_key_values(pairs: &[String]) -> Result<Value> {
    build_arguments(None, pairs)
}

/// Merge a JSON object with `key=value` pairs, the pairs taking precedence.
pub fn build_arguments(json: Option<&str>, pairs: &[String]) -> Result<Value> {
    let mut object = match json {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("invalid --json arguments")? {
            Value::Object(map) => map,
            other => {
                return Err(Error::message(format!(
                    "--json arguments must be an object, got {other}"
                )));
            },
        },
        None => Map::new(),
    };

    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            return Err(Error::InvalidArgument {
                argument: pair.clone(),
            });
        };
        if key.is_empty() {
            return Err(Error::InvalidArgument {
                argument: pair.clone(),
            });
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        object.insert(key.to_string(), value);
    }
    Ok(Value::Object(object))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn pairs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn typed_and_string_values() {
        let args = parse_key_values(&pairs(&["path=/tmp/a b", "limit=10", "force=true", "tags=[\"x\"]"]))
            .unwrap();
        assert_eq!(
            args,
            json!({"path": "/tmp/a b", "limit": 10, "force": true, "tags": ["x"]})
        );
    }

    #[test]
    fn value_may_contain_equals() {
        let args = parse_key_values(&pairs(&["query=a=b"])).unwrap();
        assert_eq!(args, json!({"query": "a=b"}));
    }

    #[test]
    fn rejects_malformed_pairs() {
        assert!(matches!(
            parse_key_values(&pairs(&["verbose"])),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(parse_key_values(&pairs(&["=x"])).is_err());
    }

    #[test]
    fn pairs_override_json() {
        let args = build_arguments(Some(r#"{"a": 1, "b": 2}"#), &pairs(&["b=3"])).unwrap();
        assert_eq!(args, json!({"a": 1, "b": 3}));
        assert!(build_arguments(Some("[1]"), &[]).is_err());
        assert!(build_arguments(Some("{"), &[]).is_err());
    }
}
