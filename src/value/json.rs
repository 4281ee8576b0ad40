//! Plain JSON <-> [`Value`] conversion.
//!
//! Used for CLI event input, result printing and the `json` host module.
//! The JSON side is lossy: bytes, times and durations render as strings and
//! structs as objects.

use base64::Engine;
use serde_json::{Map, Number};

use super::{DictItem, Value};

/// Convert a plain JSON document into a wire value.
///
/// Objects become dicts with string keys, integral numbers that fit `i64`
/// become integers, everything else numeric becomes a float.
pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Nothing,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(from_json).collect()),
        serde_json::Value::Object(map) => Value::Dict(
            map.iter()
                .map(|(k, v)| DictItem {
                    k: Value::String(k.clone()),
                    v: from_json(v),
                })
                .collect(),
        ),
    }
}

/// Render a wire value as plain JSON.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nothing => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(n) => serde_json::Value::Number(Number::from(*n)),
        Value::Float(x) => Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => {
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        Value::List(items) | Value::Set(items) => {
            serde_json::Value::Array(items.iter().map(to_json).collect())
        }
        Value::Dict(items) => {
            let mut map = Map::new();
            for item in items {
                let key = match &item.k {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                map.insert(key, to_json(&item.v));
            }
            serde_json::Value::Object(map)
        }
        Value::Struct(s) => {
            let mut map = Map::new();
            for (name, field) in &s.fields {
                map.insert(name.clone(), to_json(field));
            }
            serde_json::Value::Object(map)
        }
        Value::Time(t) => serde_json::Value::String(t.to_rfc3339()),
        Value::Duration(d) => {
            let secs = d.seconds as f64 + f64::from(d.nanos) / 1e9;
            Number::from_f64(secs)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null)
        }
        Value::Custom(c) => match &c.value {
            Some(inner) => to_json(inner),
            None => serde_json::Value::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_nested_documents() {
        let doc = json!({"x": 1, "tags": ["a", "b"], "ratio": 0.5, "none": null});
        let value = from_json(&doc);
        assert_eq!(value.get("x"), Some(&Value::Integer(1)));
        assert_eq!(value.get("ratio"), Some(&Value::Float(0.5)));
        assert_eq!(value.get("none"), Some(&Value::Nothing));
        assert_eq!(to_json(&value), doc);
    }

    #[test]
    fn bytes_render_as_base64() {
        assert_eq!(to_json(&Value::Bytes(vec![0xff])), json!("/w=="));
    }
}
