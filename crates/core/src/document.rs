//! Generic phase payload: a JSON object with flatten utilities.
//!
//! Phase executors produce loosely structured nested mappings. Wrapping them
//! in `Document` gives quality rules and version diffing a single type-safe
//! surface: `flatten()` turns nesting into dotted key paths so two payloads
//! can be compared key-by-key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Self(map)
            }
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Canonical JSON bytes: object keys are emitted in sorted order, so two
    /// structurally equal documents hash identically.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        fn canonicalize(value: &Value) -> Value {
            match value {
                Value::Object(map) => {
                    let sorted: BTreeMap<_, _> =
                        map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
                    Value::Object(sorted.into_iter().collect())
                }
                Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
                other => other.clone(),
            }
        }
        // Serializing a Value cannot fail.
        serde_json::to_vec(&canonicalize(&self.as_value())).unwrap_or_default()
    }

    /// Flatten nested objects and arrays into dotted key paths.
    ///
    /// `{"a": {"b": 1}, "c": [2, 3]}` becomes
    /// `{"a.b": 1, "c.0": 2, "c.1": 3}`. Leaf values keep their JSON type.
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for (key, value) in &self.0 {
            flatten_into(&mut out, key.clone(), value);
        }
        out
    }
}

fn flatten_into(out: &mut BTreeMap<String, Value>, prefix: String, value: &Value) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, inner) in map {
                flatten_into(out, format!("{prefix}.{key}"), inner);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (index, inner) in items.iter().enumerate() {
                flatten_into(out, format!("{prefix}.{index}"), inner);
            }
        }
        other => {
            out.insert(prefix, other.clone());
        }
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_nested_objects() {
        let doc = Document::from_value(json!({
            "title": "Launch deck",
            "sections": {"intro": {"words": 120}, "body": {"words": 640}}
        }));
        let flat = doc.flatten();

        assert_eq!(flat.get("title"), Some(&json!("Launch deck")));
        assert_eq!(flat.get("sections.intro.words"), Some(&json!(120)));
        assert_eq!(flat.get("sections.body.words"), Some(&json!(640)));
    }

    #[test]
    fn test_flatten_arrays_by_index() {
        let doc = Document::from_value(json!({"tags": ["draft", "v2"]}));
        let flat = doc.flatten();

        assert_eq!(flat.get("tags.0"), Some(&json!("draft")));
        assert_eq!(flat.get("tags.1"), Some(&json!("v2")));
    }

    #[test]
    fn test_flatten_keeps_empty_containers_as_leaves() {
        let doc = Document::from_value(json!({"empty_obj": {}, "empty_arr": []}));
        let flat = doc.flatten();

        assert_eq!(flat.get("empty_obj"), Some(&json!({})));
        assert_eq!(flat.get("empty_arr"), Some(&json!([])));
    }

    #[test]
    fn test_canonical_bytes_key_order_independent() {
        let a = Document::from_value(json!({"x": 1, "y": {"b": 2, "a": 3}}));
        let b = Document::from_value(json!({"y": {"a": 3, "b": 2}, "x": 1}));
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn test_non_object_wrapped_under_value_key() {
        let doc = Document::from_value(json!("plain text"));
        assert_eq!(doc.get("value"), Some(&json!("plain text")));
    }
}
