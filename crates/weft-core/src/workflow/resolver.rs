//! `${name}` placeholder substitution over task parameters.
//!
//! Pure functions over a `VariableSnapshot`. A string that is exactly one
//! placeholder is replaced by the variable's raw value, keeping its JSON type.
//! Placeholders embedded in longer text are replaced by the value rendered as
//! text. Unknown names are left untouched.

use serde_json::{Map, Value};

use super::context::{VariableSnapshot, value_to_string};

const OPEN: &str = "${";
const CLOSE: char = '}';

/// Resolve every placeholder in a parameter map.
pub fn resolve_parameters(parameters: &Map<String, Value>, vars: &VariableSnapshot) -> Map<String, Value> {
    parameters
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, vars)))
        .collect()
}

/// Resolve placeholders recursively through objects and arrays.
pub fn resolve_value(value: &Value, vars: &VariableSnapshot) -> Value {
    match value {
        Value::String(s) => resolve_string_value(s, vars),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(resolve_parameters(map, vars)),
        other => other.clone(),
    }
}

fn resolve_string_value(s: &str, vars: &VariableSnapshot) -> Value {
    match whole_placeholder(s).and_then(|name| vars.lookup(name)) {
        Some(value) => value.clone(),
        None => Value::String(resolve_template(s, vars)),
    }
}

/// The variable name when `s` is exactly `${name}`.
fn whole_placeholder(s: &str) -> Option<&str> {
    let name = s.strip_prefix(OPEN)?.strip_suffix(CLOSE)?;
    if name.is_empty() || name.contains(CLOSE) || name.contains(OPEN) {
        return None;
    }
    Some(name)
}

/// Substitute embedded placeholders textually.
pub fn resolve_template(template: &str, vars: &VariableSnapshot) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = &after_open[..end];
        match vars.lookup(name) {
            Some(value) if !name.is_empty() => out.push_str(&value_to_string(value)),
            _ => {
                out.push_str(OPEN);
                out.push_str(name);
                out.push(CLOSE);
            }
        }
        rest = &after_open[end + 1..];
    }

    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn vars() -> VariableSnapshot {
        let map: HashMap<String, Value> = serde_json::from_value(json!({
            "name": "weft",
            "count": 3,
            "flags": {"fast": true},
            "list": [1, 2]
        }))
        .unwrap();
        VariableSnapshot::new(map)
    }

    #[test]
    fn test_whole_placeholder_keeps_type() {
        let v = vars();
        assert_eq!(resolve_value(&json!("${count}"), &v), json!(3));
        assert_eq!(resolve_value(&json!("${flags}"), &v), json!({"fast": true}));
        assert_eq!(resolve_value(&json!("${list}"), &v), json!([1, 2]));
    }

    #[test]
    fn test_embedded_placeholders_stringify() {
        let v = vars();
        assert_eq!(
            resolve_value(&json!("hello ${name}, you have ${count} items"), &v),
            json!("hello weft, you have 3 items")
        );
        assert_eq!(
            resolve_value(&json!("flags=${flags}"), &v),
            json!(r#"flags={"fast":true}"#)
        );
    }

    #[test]
    fn test_unresolved_placeholder_left_verbatim() {
        let v = vars();
        assert_eq!(resolve_value(&json!("${missing}"), &v), json!("${missing}"));
        assert_eq!(
            resolve_value(&json!("a ${missing} b ${name}"), &v),
            json!("a ${missing} b weft")
        );
        assert_eq!(resolve_value(&json!("open ${name"), &v), json!("open ${name"));
        assert_eq!(resolve_value(&json!("${}"), &v), json!("${}"));
    }

    #[test]
    fn test_dotted_path_placeholder() {
        let v = vars();
        assert_eq!(resolve_value(&json!("${flags.fast}"), &v), json!(true));
    }

    #[test]
    fn test_recurses_through_maps_and_lists() {
        let v = vars();
        let params = json!({
            "message": "Hi ${name}",
            "nested": {"n": "${count}", "items": ["${name}", 5, null]}
        });
        let Value::Object(map) = params else {
            unreachable!()
        };
        let resolved = resolve_parameters(&map, &v);
        assert_eq!(resolved["message"], json!("Hi weft"));
        assert_eq!(resolved["nested"]["n"], json!(3));
        assert_eq!(resolved["nested"]["items"], json!(["weft", 5, null]));
    }

    #[test]
    fn test_non_string_scalars_untouched() {
        let v = vars();
        assert_eq!(resolve_value(&json!(1.5), &v), json!(1.5));
        assert_eq!(resolve_value(&json!(false), &v), json!(false));
    }
}
