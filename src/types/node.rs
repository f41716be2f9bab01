//! Read-only view over a parsed document tree.
//!
//! [`DocumentNode`] wraps a borrowed [`serde_json::Value`] so rule evaluation
//! can work on a raw tree without any typed model. Field navigation on an
//! array never picks an element implicitly; callers fan out with
//! [`DocumentNode::elements`].

use serde_json::Value as JsonValue;

/// Kind of a tree position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Object,
    Array,
    String,
    Number,
    Boolean,
    Null,
}

impl NodeKind {
    /// JSON kind name used in diagnostics (`valueType`, `actualType`)
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Object => "object",
            NodeKind::Array => "array",
            NodeKind::String => "string",
            NodeKind::Number => "number",
            NodeKind::Boolean => "boolean",
            NodeKind::Null => "null",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentNode<'a> {
    value: &'a JsonValue,
}

impl<'a> DocumentNode<'a> {
    pub fn new(value: &'a JsonValue) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &'a JsonValue {
        self.value
    }

    pub fn kind(&self) -> NodeKind {
        match self.value {
            JsonValue::Object(_) => NodeKind::Object,
            JsonValue::Array(_) => NodeKind::Array,
            JsonValue::String(_) => NodeKind::String,
            JsonValue::Number(_) => NodeKind::Number,
            JsonValue::Bool(_) => NodeKind::Boolean,
            JsonValue::Null => NodeKind::Null,
        }
    }

    pub fn is_array(&self) -> bool {
        self.value.is_array()
    }

    pub fn is_object(&self) -> bool {
        self.value.is_object()
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self.kind(),
            NodeKind::String | NodeKind::Number | NodeKind::Boolean
        )
    }

    /// Direct child by field name. Returns the raw child, which may itself be
    /// an array; use [`DocumentNode::elements`] to fan out.
    pub fn field(&self, name: &str) -> Option<DocumentNode<'a>> {
        self.value
            .as_object()
            .and_then(|map| map.get(name))
            .map(DocumentNode::new)
    }

    /// All `(name, child)` pairs of an object in document order
    pub fn fields(&self) -> Vec<(&'a str, DocumentNode<'a>)> {
        match self.value {
            JsonValue::Object(map) => map
                .iter()
                .map(|(k, v)| (k.as_str(), DocumentNode::new(v)))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Array elements with their indices; empty for non-arrays
    pub fn elements(&self) -> Vec<(usize, DocumentNode<'a>)> {
        match self.value {
            JsonValue::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (i, DocumentNode::new(v)))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        match self.value {
            JsonValue::Array(items) => items.len(),
            JsonValue::Object(map) => map.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_str(&self) -> Option<&'a str> {
        self.value.as_str()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// `resourceType` of an object node, if any
    pub fn resource_type(&self) -> Option<&'a str> {
        self.field("resourceType").and_then(|n| n.as_str())
    }

    /// Null, empty or whitespace-only strings, empty arrays and empty objects
    pub fn is_blank(&self) -> bool {
        match self.value {
            JsonValue::Null => true,
            JsonValue::String(s) => s.trim().is_empty(),
            JsonValue::Array(items) => items.is_empty(),
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Number(_) | JsonValue::Bool(_) => false,
        }
    }

    /// Text form of a scalar (numbers and booleans rendered as JSON)
    pub fn scalar_text(&self) -> Option<String> {
        match self.value {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Equality with numeric normalization (`1` equals `1.0`)
pub fn values_equal(left: &JsonValue, right: &JsonValue) -> bool {
    match (left, right) {
        (JsonValue::Number(a), JsonValue::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        (JsonValue::Array(a), JsonValue::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (JsonValue::Object(a), JsonValue::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => left == right,
    }
}
