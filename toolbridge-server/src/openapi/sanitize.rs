// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Parameter-schema sanitizer.
//!
//! Workers announce a JSON-Schema subset; the published description must be
//! self-contained and bounded, so this pass keeps only the supported
//! vocabulary, truncates descriptions, normalizes `required` to an array
//! and coerces `default` values to their declared type. `$ref`, `oneOf`,
//! `allOf` and `anyOf` are dropped. Sanitizing is idempotent.

use serde_json::{json, Map, Value};

/// Hard cap for any description string in the published document.
pub const MAX_DESCRIPTION_CHARS: usize = 300;

/// Scalar and array constraints carried through verbatim.
const PASSTHROUGH_KEYS: [&str; 11] = [
    "format",
    "enum",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "minLength",
    "maxLength",
    "pattern",
    "minItems",
    "maxItems",
];

/// Truncate to exactly [`MAX_DESCRIPTION_CHARS`] characters, ellipsis
/// included, when the input is longer.
pub fn truncate_description(s: &str) -> String {
    if s.chars().count() <= MAX_DESCRIPTION_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_DESCRIPTION_CHARS - 1).collect();
    out.push('…');
    out
}

/// Reduce a tool parameter schema to the supported subset.
pub fn sanitize_schema(schema: &Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return json!({ "type": "object" });
    };

    let mut out = Map::new();

    let declared = obj.get("type").and_then(Value::as_str);
    let is_object =
        declared == Some("object") || (declared.is_none() && obj.contains_key("properties"));
    if let Some(ty) = declared {
        out.insert("type".to_string(), json!(ty));
    } else if is_object {
        out.insert("type".to_string(), json!("object"));
    }

    if let Some(desc) = obj.get("description").and_then(Value::as_str) {
        out.insert("description".to_string(), json!(truncate_description(desc)));
    }

    for key in PASSTHROUGH_KEYS {
        if let Some(v) = obj.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }

    if let Some(default) = obj.get("default") {
        if let Some(coerced) = coerce_default(declared, default) {
            out.insert("default".to_string(), coerced);
        }
    }

    if let Some(items) = obj.get("items") {
        out.insert("items".to_string(), sanitize_schema(items));
    }

    if let Some(props) = obj.get("properties").and_then(Value::as_object) {
        let mut sanitized = Map::new();
        for (name, sub) in props {
            sanitized.insert(name.clone(), sanitize_schema(sub));
        }
        out.insert("properties".to_string(), Value::Object(sanitized));
    }

    match obj.get("additionalProperties") {
        Some(Value::Bool(b)) => {
            out.insert("additionalProperties".to_string(), json!(b));
        }
        Some(v @ Value::Object(_)) => {
            out.insert("additionalProperties".to_string(), sanitize_schema(v));
        }
        _ => {}
    }

    // Always an array of strings on object schemas, never an object or a
    // bare string.
    if is_object {
        let required: Vec<String> = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        out.insert("required".to_string(), json!(required));
    }

    Value::Object(out)
}

/// Coerce a `default` to the declared type; `None` drops it.
fn coerce_default(declared: Option<&str>, value: &Value) -> Option<Value> {
    match declared {
        Some("string") => Some(match value {
            Value::String(_) => value.clone(),
            other => Value::String(other.to_string()),
        }),
        Some("integer") => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => s.parse::<i64>().ok().map(|n| json!(n)),
            _ => None,
        },
        Some("number") => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            _ => None,
        },
        Some("boolean") => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) if s == "true" => Some(json!(true)),
            Value::String(s) if s == "false" => Some(json!(false)),
            _ => None,
        },
        Some("array") => Some(match value {
            Value::Array(_) => value.clone(),
            other => json!([other]),
        }),
        Some("object") => Some(match value {
            Value::Object(_) => value.clone(),
            _ => json!({}),
        }),
        _ => Some(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizing_is_idempotent() {
        let schema = json!({
            "type": "object",
            "description": "d".repeat(400),
            "required": ["a"],
            "additionalProperties": false,
            "properties": {
                "a": { "type": "string", "minLength": 1, "default": 7 },
                "b": {
                    "type": "array",
                    "items": { "type": "integer", "minimum": 0, "default": "3" },
                    "default": "x"
                },
                "c": { "properties": { "inner": { "type": "boolean" } } },
                "d": { "oneOf": [{ "type": "string" }], "$ref": "#/x" }
            }
        });
        let once = sanitize_schema(&schema);
        let twice = sanitize_schema(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn unsupported_combinators_are_dropped() {
        let schema = json!({
            "type": "object",
            "$ref": "#/components/schemas/Thing",
            "oneOf": [{ "type": "string" }],
            "allOf": [{ "type": "string" }],
            "anyOf": [{ "type": "string" }],
            "properties": {}
        });
        let sanitized = sanitize_schema(&schema);
        for key in ["$ref", "oneOf", "allOf", "anyOf"] {
            assert!(sanitized.get(key).is_none(), "{key} should be dropped");
        }
    }

    #[test]
    fn required_is_always_an_array() {
        let with_bogus = json!({ "type": "object", "required": "name" });
        assert_eq!(sanitize_schema(&with_bogus)["required"], json!([]));

        let without = json!({ "type": "object" });
        assert_eq!(sanitize_schema(&without)["required"], json!([]));

        let with_list = json!({ "type": "object", "required": ["name", 3, "age"] });
        assert_eq!(sanitize_schema(&with_list)["required"], json!(["name", "age"]));
    }

    #[test]
    fn defaults_are_coerced_to_declared_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "s": { "type": "string", "default": 5 },
                "n": { "type": "number", "default": "2.5" },
                "i": { "type": "integer", "default": "4" },
                "b": { "type": "boolean", "default": "true" },
                "arr": { "type": "array", "default": "x" },
                "obj": { "type": "object", "default": "not an object" }
            }
        });
        let sanitized = sanitize_schema(&schema);
        let props = &sanitized["properties"];
        assert_eq!(props["s"]["default"], json!("5"));
        assert_eq!(props["n"]["default"], json!(2.5));
        assert_eq!(props["i"]["default"], json!(4));
        assert_eq!(props["b"]["default"], json!(true));
        assert_eq!(props["arr"]["default"], json!(["x"]));
        assert_eq!(props["obj"]["default"], json!({}));
    }

    #[test]
    fn uncoercible_defaults_are_dropped() {
        let schema = json!({ "type": "integer", "default": "not-a-number" });
        assert!(sanitize_schema(&schema).get("default").is_none());
    }

    #[test]
    fn missing_type_with_properties_becomes_object() {
        let schema = json!({ "properties": { "x": { "type": "string" } } });
        let sanitized = sanitize_schema(&schema);
        assert_eq!(sanitized["type"], "object");
        assert_eq!(sanitized["required"], json!([]));
    }

    #[test]
    fn long_descriptions_end_at_exactly_300_chars() {
        let long = "x".repeat(301);
        let truncated = truncate_description(&long);
        assert_eq!(truncated.chars().count(), MAX_DESCRIPTION_CHARS);
        assert!(truncated.ends_with('…'));

        let exact = "y".repeat(300);
        assert_eq!(truncate_description(&exact), exact);
    }
}
