//! Dynamic values exchanged with Terraform.
//!
//! Configuration and state travel over the wire as MessagePack-encoded
//! dynamic values. [`Value`] is the in-memory form of those payloads: a small
//! closed union over the shapes a schema can describe, plus the
//! [`Value::Unknown`] sentinel Terraform uses for "not known until apply
//! completes".
//!
//! Unknown is always a leaf. No traversal in this crate (codec, validator,
//! plan engine) ever descends into an unknown value, regardless of the
//! attribute type declared for its position.

use std::collections::BTreeMap;

/// A dynamic configuration or state value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// An absent or null value.
    Null,
    /// A boolean value.
    Bool(bool),
    /// A numeric value.
    Number(f64),
    /// A string value.
    String(String),
    /// An ordered sequence of values.
    Array(Vec<Value>),
    /// A mapping from field names to values.
    Object(BTreeMap<String, Value>),
    /// A value that will only be known once apply completes.
    ///
    /// Carries the raw extension payload when the value was decoded from the
    /// wire; values constructed in-process carry `None`.
    Unknown(Option<Vec<u8>>),
}

impl Value {
    /// Create a fresh unknown value.
    pub fn unknown() -> Self {
        Value::Unknown(None)
    }

    /// Create an object value from field name/value pairs.
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Create an array value.
    pub fn array<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::Array(items.into_iter().collect())
    }

    /// Whether this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value is the unknown sentinel.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Value::Unknown(_))
    }

    pub(crate) fn is_null_or_unknown(&self) -> bool {
        matches!(self, Value::Null | Value::Unknown(_))
    }

    /// The boolean content, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The numeric content, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The elements, if this is an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// The field map, if this is an object.
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a field by name. Returns `None` for non-objects too, so it can
    /// be chained over values whose shape is not yet established.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(field),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let value = Value::object([
            ("name", Value::from("web")),
            ("port", Value::from(8080_i64)),
            ("tags", Value::array([Value::from("a"), Value::from("b")])),
        ]);

        assert_eq!(value.get("name").and_then(Value::as_str), Some("web"));
        assert_eq!(value.get("port").and_then(Value::as_f64), Some(8080.0));
        assert_eq!(
            value.get("tags").and_then(Value::as_array).map(<[Value]>::len),
            Some(2)
        );
    }

    #[test]
    fn test_null_and_unknown_predicates() {
        assert!(Value::Null.is_null());
        assert!(!Value::Null.is_unknown());

        let unknown = Value::unknown();
        assert!(unknown.is_unknown());
        assert!(!unknown.is_null());
        assert!(unknown.is_null_or_unknown());
    }

    #[test]
    fn test_get_on_non_object() {
        assert_eq!(Value::from("scalar").get("field"), None);
        assert_eq!(Value::Null.get("field"), None);
        assert_eq!(Value::unknown().get("field"), None);
    }

    #[test]
    fn test_unknown_equality_tracks_payload() {
        assert_eq!(Value::unknown(), Value::unknown());
        assert_ne!(Value::unknown(), Value::Unknown(Some(vec![0x90])));
    }
}
