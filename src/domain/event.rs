//! Inbound events delivered to the rule engine and alert inbox.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbound signal.
///
/// `event_type` is a dotted name such as `external.alert.db`; `fields` is a
/// semi-structured mapping supplied by the producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// String form of a top-level field, if present and non-null
    pub fn field_str(&self, key: &str) -> Option<String> {
        self.fields.get(key).and_then(value_as_string)
    }

    /// Serialize into a generic tree for dotted-path lookups
    pub fn to_tree(&self) -> Value {
        let mut root = serde_json::Map::new();
        root.insert("type".to_string(), Value::String(self.event_type.clone()));
        root.insert("message".to_string(), Value::String(self.message.clone()));
        root.insert(
            "fields".to_string(),
            Value::Object(self.fields.clone().into_iter().collect()),
        );
        Value::Object(root)
    }
}

/// Resolve a dotted path (`fields.severity`) against a tree.
///
/// Array elements are addressed by numeric segments.
pub fn lookup_path<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = tree;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// String form of a value; `None` for null
pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}
