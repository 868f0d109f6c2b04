//! Argument validation against a tool's `inputSchema`.
//!
//! Covers the JSON Schema subset tool definitions use in practice: `type`
//! (single or list), `properties`, `required`, `additionalProperties`,
//! `items`, `enum`, `const`, numeric and length bounds, and the `allOf` /
//! `anyOf` / `oneOf` combinators. Unknown keywords are ignored.

use serde_json::{Map, Value};

/// Validate `value` against `schema`. Returns one message per violation,
/// each prefixed with the JSON path of the offending value.
pub fn validate(schema: &Value, value: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    check(schema, value, "$", &mut errors);
    errors
}

fn check(schema: &Value, value: &Value, path: &str, errors: &mut Vec<String>) {
    let schema = match schema {
        Value::Bool(true) => return,
        Value::Bool(false) => {
            errors.push(format!("{path}: no value is allowed here"));
            return;
        },
        Value::Object(schema) => schema,
        // Malformed schemas accept everything.
        _ => return,
    };

    if let Some(expected) = schema.get("type")
        && !type_matches(expected, value)
    {
        errors.push(format!(
            "{path}: expected {}, got {}",
            describe_type(expected),
            type_name(value)
        ));
        return;
    }

    if let Some(options) = schema.get("enum").and_then(Value::as_array)
        && !options.contains(value)
    {
        errors.push(format!("{path}: value is not one of {}", Value::Array(options.clone())));
    }
    if let Some(constant) = schema.get("const")
        && constant != value
    {
        errors.push(format!("{path}: value must equal {constant}"));
    }

    match value {
        Value::Object(map) => check_object(schema, map, path, errors),
        Value::Array(items) => check_array(schema, items, path, errors),
        Value::String(s) => check_string(schema, s, path, errors),
        Value::Number(_) => check_number(schema, value, path, errors),
        _ => {},
    }

    check_combinators(schema, value, path, errors);
}

fn check_object(
    schema: &Map<String, Value>,
    map: &Map<String, Value>,
    path: &str,
    errors: &mut Vec<String>,
) {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !map.contains_key(key) {
                errors.push(format!("{path}: missing required property '{key}'"));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    for (key, child) in map {
        let child_path = format!("{path}.{key}");
        match properties.and_then(|p| p.get(key)) {
            Some(child_schema) => check(child_schema, child, &child_path, errors),
            None => match schema.get("additionalProperties") {
                Some(Value::Bool(false)) => {
                    errors.push(format!("{path}: unexpected property '{key}'"));
                },
                Some(extra @ Value::Object(_)) => check(extra, child, &child_path, errors),
                _ => {},
            },
        }
    }
}

fn check_array(schema: &Map<String, Value>, items: &[Value], path: &str, errors: &mut Vec<String>) {
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64)
        && (items.len() as u64) < min
    {
        errors.push(format!("{path}: expected at least {min} items, got {}", items.len()));
    }
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64)
        && (items.len() as u64) > max
    {
        errors.push(format!("{path}: expected at most {max} items, got {}", items.len()));
    }
    if let Some(item_schema) = schema.get("items") {
        for (i, item) in items.iter().enumerate() {
            check(item_schema, item, &format!("{path}[{i}]"), errors);
        }
    }
}

fn check_string(schema: &Map<String, Value>, s: &str, path: &str, errors: &mut Vec<String>) {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64)
        && len < min
    {
        errors.push(format!("{path}: shorter than {min} characters"));
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64)
        && len > max
    {
        errors.push(format!("{path}: longer than {max} characters"));
    }
}

fn check_number(schema: &Map<String, Value>, value: &Value, path: &str, errors: &mut Vec<String>) {
    let Some(n) = value.as_f64() else {
        return;
    };
    let bound = |key: &str| schema.get(key).and_then(Value::as_f64);
    if let Some(min) = bound("minimum")
        && n < min
    {
        errors.push(format!("{path}: {n} is less than the minimum {min}"));
    }
    if let Some(max) = bound("maximum")
        && n > max
    {
        errors.push(format!("{path}: {n} is greater than the maximum {max}"));
    }
    if let Some(min) = bound("exclusiveMinimum")
        && n <= min
    {
        errors.push(format!("{path}: {n} must be greater than {min}"));
    }
    if let Some(max) = bound("exclusiveMaximum")
        && n >= max
    {
        errors.push(format!("{path}: {n} must be less than {max}"));
    }
}

fn check_combinators(
    schema: &Map<String, Value>,
    value: &Value,
    path: &str,
    errors: &mut Vec<String>,
) {
    if let Some(all) = schema.get("allOf").and_then(Value::as_array) {
        for sub in all {
            check(sub, value, path, errors);
        }
    }
    if let Some(any) = schema.get("anyOf").and_then(Value::as_array)
        && !any.iter().any(|sub| validate_at(sub, value, path).is_empty())
    {
        errors.push(format!("{path}: value matches none of the allowed schemas"));
    }
    if let Some(one) = schema.get("oneOf").and_then(Value::as_array) {
        let matching = one
            .iter()
            .filter(|sub| validate_at(sub, value, path).is_empty())
            .count();
        if matching != 1 {
            errors.push(format!(
                "{path}: value must match exactly one schema, matched {matching}"
            ));
        }
    }
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Vec<String> {
    let mut errors = Vec::new();
    check(schema, value, path, &mut errors);
    errors
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(t) => single_type_matches(t, value),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| single_type_matches(t, value)),
        _ => true,
    }
}

fn single_type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        },
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.as_str().unwrap_or("valid type").to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn read_file_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1},
                "limit": {"type": "integer", "minimum": 1, "maximum": 1000},
                "mode": {"enum": ["text", "binary"]}
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    #[test]
    fn accepts_valid_arguments() {
        let errors = validate(
            &read_file_schema(),
            &json!({"path": "/tmp/a", "limit": 10, "mode": "text"}),
        );
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn reports_missing_required_and_wrong_types() {
        let errors = validate(&read_file_schema(), &json!({"limit": "ten"}));
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("missing required property 'path'")));
        assert!(errors.iter().any(|e| e.starts_with("$.limit: expected integer")));
    }

    #[test]
    fn rejects_unexpected_properties_and_bounds() {
        let errors = validate(
            &read_file_schema(),
            &json!({"path": "", "limit": 0, "mode": "raw", "extra": true}),
        );
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("unexpected property 'extra'")));
        assert!(errors.iter().any(|e| e.contains("less than the minimum")));
        assert!(errors.iter().any(|e| e.contains("shorter than 1")));
        assert!(errors.iter().any(|e| e.contains("not one of")));
    }

    #[test]
    fn non_object_arguments() {
        let errors = validate(&read_file_schema(), &json!("just a string"));
        assert_eq!(errors, vec!["$: expected object, got string"]);
    }

    #[test]
    fn arrays_and_nested_items() {
        let schema = json!({
            "type": "object",
            "properties": {
                "files": {"type": "array", "items": {"type": "string"}, "maxItems": 2}
            }
        });
        let errors = validate(&schema, &json!({"files": ["a", 3, "c"]}));
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(errors.iter().any(|e| e.starts_with("$.files[1]: expected string")));
    }

    #[test]
    fn combinators() {
        let schema = json!({"anyOf": [{"type": "string"}, {"type": "integer"}]});
        assert!(validate(&schema, &json!(3)).is_empty());
        assert_eq!(validate(&schema, &json!(true)).len(), 1);

        let schema = json!({"oneOf": [{"type": "number"}, {"type": "integer"}]});
        assert_eq!(validate(&schema, &json!(3)).len(), 1);
        assert!(validate(&schema, &json!(3.5)).is_empty());
    }

    #[test]
    fn permissive_schemas() {
        assert!(validate(&json!({}), &json!({"anything": 1})).is_empty());
        assert!(validate(&json!(true), &json!(null)).is_empty());
        assert_eq!(validate(&json!(false), &json!(null)).len(), 1);
        assert!(validate(&json!({"type": ["string", "null"]}), &json!(null)).is_empty());
    }
}
