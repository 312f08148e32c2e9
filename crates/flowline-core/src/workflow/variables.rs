//! `{{ name }}` placeholder resolution for node configuration.
//!
//! Every string inside a node's configuration (recursively through objects
//! and arrays) is scanned for placeholders and substituted from the run's
//! variables:
//!
//! - A string that is wholly one placeholder (`"{{order_id}}"`) becomes the
//!   variable's native JSON value, so numbers, lists and objects keep their
//!   type.
//! - Placeholders embedded in other text are rendered into a string. String
//!   values are inserted raw; everything else as compact JSON.
//! - Whitespace inside the braces is ignored and dotted paths walk into nested
//!   objects and arrays (`{{order.items.0.sku}}`).
//! - Unknown placeholders are left untouched.
//!
//! Substituted text is never rescanned, so a variable whose value contains
//! `{{...}}` cannot inject further lookups.

use flowline_types::automation::Variables;
use serde_json::{Map, Value};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Resolve every placeholder in a node's configuration map.
pub fn resolve_config(config: &Map<String, Value>, vars: &Variables) -> Map<String, Value> {
    config
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, vars)))
        .collect()
}

/// Resolve placeholders in any JSON value.
pub fn resolve_value(value: &Value, vars: &Variables) -> Value {
    match value {
        Value::String(s) => resolve_str(s, vars),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(resolve_config(map, vars)),
        other => other.clone(),
    }
}

/// Resolve placeholders in a single string.
pub fn resolve_str(template: &str, vars: &Variables) -> Value {
    if let Some(path) = whole_placeholder(template) {
        return match lookup(vars, path) {
            Some(v) => v.clone(),
            None => Value::String(template.to_string()),
        };
    }

    if !template.contains(OPEN) {
        return Value::String(template.to_string());
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        let raw = &rest[start..start + OPEN.len() + end + CLOSE.len()];
        out.push_str(&rest[..start]);
        match lookup(vars, after_open[..end].trim()) {
            Some(v) => out.push_str(&render(v)),
            None => out.push_str(raw),
        }
        rest = &rest[start + raw.len()..];
    }
    out.push_str(rest);
    Value::String(out)
}

/// Look up a dotted path in the variable map.
pub fn lookup<'a>(vars: &'a Variables, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut segments = path.split('.');
    let mut current = vars.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Returns the trimmed path when the whole string is exactly one placeholder.
fn whole_placeholder(template: &str) -> Option<&str> {
    let inner = template
        .trim()
        .strip_prefix(OPEN)?
        .strip_suffix(CLOSE)?;
    if inner.contains(OPEN) || inner.contains(CLOSE) {
        return None;
    }
    Some(inner.trim())
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(v: Value) -> Variables {
        match v {
            Value::Object(map) => map,
            _ => panic!("test variables must be an object"),
        }
    }

    #[test]
    fn test_whole_placeholder_keeps_integer() {
        let v = vars(json!({"order_id": 42}));
        assert_eq!(resolve_str("{{order_id}}", &v), json!(42));
    }

    #[test]
    fn test_mixed_text_becomes_string() {
        let v = vars(json!({"order_id": 42}));
        assert_eq!(resolve_str("Order #{{order_id}}", &v), json!("Order #42"));
    }

    #[test]
    fn test_whole_placeholder_keeps_list_and_object() {
        let v = vars(json!({"items": [1, 2], "customer": {"name": "Ada"}}));
        assert_eq!(resolve_str("{{ items }}", &v), json!([1, 2]));
        assert_eq!(resolve_str("{{customer}}", &v), json!({"name": "Ada"}));
    }

    #[test]
    fn test_whitespace_inside_braces_ignored() {
        let v = vars(json!({"name": "Ada"}));
        assert_eq!(resolve_str("Hi {{   name  }}!", &v), json!("Hi Ada!"));
    }

    #[test]
    fn test_dotted_path_into_objects_and_arrays() {
        let v = vars(json!({"order": {"items": [{"sku": "A-1"}, {"sku": "B-2"}]}}));
        assert_eq!(resolve_str("{{order.items.1.sku}}", &v), json!("B-2"));
        assert_eq!(resolve_str("sku={{order.items.0.sku}}", &v), json!("sku=A-1"));
    }

    #[test]
    fn test_unknown_placeholder_left_as_is() {
        let v = vars(json!({"a": 1}));
        assert_eq!(resolve_str("{{missing}}", &v), json!("{{missing}}"));
        assert_eq!(resolve_str("x {{missing}} {{a}}", &v), json!("x {{missing}} 1"));
    }

    #[test]
    fn test_non_string_values_render_as_json_in_text() {
        let v = vars(json!({"flag": true, "list": [1, "x"], "nothing": null}));
        assert_eq!(
            resolve_str("{{flag}}/{{list}}/{{nothing}}", &v),
            json!("true/[1,\"x\"]/null")
        );
    }

    #[test]
    fn test_unterminated_placeholder_kept() {
        let v = vars(json!({"a": 1}));
        assert_eq!(resolve_str("{{a}} and {{a", &v), json!("1 and {{a"));
    }

    #[test]
    fn test_substituted_text_not_rescanned() {
        let v = vars(json!({"a": "{{b}}", "b": "secret"}));
        assert_eq!(resolve_str("value: {{a}}", &v), json!("value: {{b}}"));
    }

    #[test]
    fn test_two_placeholders_are_not_a_whole_value() {
        let v = vars(json!({"a": 1, "b": 2}));
        assert_eq!(resolve_str("{{a}}{{b}}", &v), json!("12"));
    }

    #[test]
    fn test_resolve_config_recurses() {
        let v = vars(json!({"host": "example.com", "retries": 3}));
        let config = vars(json!({
            "url": "https://{{host}}/api",
            "options": {"retries": "{{retries}}", "tags": ["{{host}}", 7]},
            "enabled": true
        }));

        let resolved = resolve_config(&config, &v);
        assert_eq!(resolved["url"], "https://example.com/api");
        assert_eq!(resolved["options"]["retries"], 3);
        assert_eq!(resolved["options"]["tags"], json!(["example.com", 7]));
        assert_eq!(resolved["enabled"], true);
    }

    #[test]
    fn test_lookup_rejects_empty_and_scalar_descent() {
        let v = vars(json!({"n": 5}));
        assert!(lookup(&v, "").is_none());
        assert!(lookup(&v, "n.x").is_none());
    }
}
