//! Field values
//!
//! A single value type is used both for raw properties read off the bus and
//! for normalized field values stored on an instance. `Unavailable` is the
//! explicit marker for data that could not be fetched or parsed.

use serde::{Deserialize, Serialize, Serializer};

/// Rendered form of [`Value::Unavailable`]
pub const NOT_AVAILABLE: &str = "N/A";

// ─────────────────────────────────────────────────────────────────────────────
// Association
// ─────────────────────────────────────────────────────────────────────────────

/// One association tuple as exposed by association definitions on the bus
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Association {
    pub source: String,
    pub destination: String,
    pub endpoint: String,
}

impl Association {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            endpoint: endpoint.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// A property or field value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Not fetched, absent, or failed to parse
    #[default]
    Unavailable,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Associations(Vec<Association>),
}

impl Value {
    pub fn is_available(&self) -> bool {
        !matches!(self, Value::Unavailable)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 (also converts from u64 when it fits)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// Get as u64 (also converts from non-negative i64)
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    /// Get as f64 (also converts from integers)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get as a list of strings; fails if any element is not a string
    pub fn as_string_list(&self) -> Option<Vec<&str>> {
        self.as_list()?.iter().map(Value::as_str).collect()
    }

    pub fn as_associations(&self) -> Option<&[Association]> {
        match self {
            Value::Associations(a) => Some(a),
            _ => None,
        }
    }

    /// Short type name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unavailable => "unavailable",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Associations(_) => "associations",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Unavailable => f.write_str(NOT_AVAILABLE),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Associations(a) => write!(f, "<{} associations>", a.len()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Unavailable => serializer.serialize_str(NOT_AVAILABLE),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::UInt(u) => serializer.serialize_u64(*u),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => items.serialize(serializer),
            Value::Associations(a) => a.serialize(serializer),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v.into_iter().map(Value::String).collect())
    }
}

impl From<Vec<Association>> for Value {
    fn from(v: Vec<Association>) -> Self {
        Value::Associations(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Unavailable)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// serde_json::Value Interop
// ─────────────────────────────────────────────────────────────────────────────

impl From<serde_json::Value> for Value {
    /// Arrays whose elements are all three-string arrays are read as
    /// association tuples. Objects and nulls have no bus counterpart.
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null | serde_json::Value::Object(_) => Value::Unavailable,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    n.as_f64().map(Value::Float).unwrap_or(Value::Unavailable)
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => match associations_from_json(&items) {
                Some(associations) => Value::Associations(associations),
                None => Value::List(items.into_iter().map(Value::from).collect()),
            },
        }
    }
}

fn associations_from_json(items: &[serde_json::Value]) -> Option<Vec<Association>> {
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|item| match item.as_array()?.as_slice() {
            [s, d, e] => Some(Association::new(s.as_str()?, d.as_str()?, e.as_str()?)),
            _ => None,
        })
        .collect()
}

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        // Serialize for Value is infallible for every variant.
        serde_json::to_value(v).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_renders_marker() {
        let json = serde_json::to_string(&Value::Unavailable).unwrap();
        assert_eq!(json, "\"N/A\"");
        assert_eq!(Value::Unavailable.to_string(), "N/A");
    }

    #[test]
    fn test_json_numbers() {
        assert_eq!(Value::from(serde_json::json!(-4)), Value::Int(-4));
        assert_eq!(Value::from(serde_json::json!(u64::MAX)), Value::UInt(u64::MAX));
        assert_eq!(Value::from(serde_json::json!(1.5)), Value::Float(1.5));
    }

    #[test]
    fn test_json_associations() {
        let raw = serde_json::json!([["chassis", "all_sensors", "/xyz/openbmc_project/inventory/system"]]);
        let value = Value::from(raw);
        let assoc = value.as_associations().unwrap();
        assert_eq!(assoc.len(), 1);
        assert_eq!(assoc[0].destination, "all_sensors");
    }

    #[test]
    fn test_json_plain_list() {
        let value = Value::from(serde_json::json!(["a", "b"]));
        assert_eq!(value.as_string_list(), Some(vec!["a", "b"]));
    }

    #[test]
    fn test_integer_conversions() {
        assert_eq!(Value::UInt(7).as_i64(), Some(7));
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::String("3".into()).as_i64(), None);
    }
}
