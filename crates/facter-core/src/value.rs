//! Typed fact values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A resolved fact value.
///
/// Serializes untagged, so a collection round-trips through JSON as plain
/// JSON values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the string slice if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Follows a dotted path (`os.family`) into nested maps and arrays.
    ///
    /// Array segments are parsed as zero-based indices.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            current = match current {
                Self::Map(map) => map.get(segment)?,
                Self::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl fmt::Display for Value {
    /// Strings print bare; structured values print as JSON.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
            Self::Array(_) | Self::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os_map() -> Value {
        let mut os = BTreeMap::new();
        os.insert("family".to_string(), Value::from("unix"));
        os.insert(
            "release".to_string(),
            Value::from(vec![Value::from(6_i64), Value::from(1_i64)]),
        );
        Value::Map(os)
    }

    #[test]
    fn display_string_is_bare() {
        assert_eq!(Value::from("4096").to_string(), "4096");
    }

    #[test]
    fn display_map_is_json() {
        assert_eq!(os_map().to_string(), r#"{"family":"unix","release":[6,1]}"#);
    }

    #[test]
    fn lookup_nested_map() {
        let os = os_map();
        assert_eq!(os.lookup("family"), Some(&Value::from("unix")));
        assert_eq!(os.lookup("release.1"), Some(&Value::from(1_i64)));
        assert_eq!(os.lookup("missing"), None);
        assert_eq!(os.lookup("family.deeper"), None);
    }

    #[test]
    fn deserializes_plain_json() {
        let value: Value =
            serde_json::from_str(r#"{"a": 1, "b": [true, 2.5, "x"]}"#).expect("valid json");
        let Value::Map(map) = value else {
            panic!("expected map");
        };
        assert_eq!(map["a"], Value::Integer(1));
        assert_eq!(
            map["b"],
            Value::Array(vec![
                Value::Boolean(true),
                Value::Float(2.5),
                Value::from("x")
            ])
        );
    }
}
