//! Fact name canonicalization.

use crate::error::BridgeError;
use mlua::Value;

/// Lower-cases string values; any other value is returned unchanged.
///
/// Lua strings are interned, so they double as the symbol form of a name.
pub fn normalize(lua: &mlua::Lua, value: Value) -> mlua::Result<Value> {
    match value {
        Value::String(s) => {
            let lowered = s.to_string_lossy().to_lowercase();
            Ok(Value::String(lua.create_string(&lowered)?))
        }
        other => Ok(other),
    }
}

/// A normalized fact name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactName(String);

impl FactName {
    /// Normalizes a Rust string.
    pub fn new(name: &str) -> Self {
        Self(name.to_lowercase())
    }

    /// Converts a Lua argument through [`normalize`], failing for anything
    /// but a string.
    pub fn from_value(lua: &mlua::Lua, value: &Value) -> Result<Self, BridgeError> {
        match normalize(lua, value.clone())? {
            Value::String(s) => Ok(Self(s.to_string_lossy().into())),
            other => Err(BridgeError::argument_type(format!(
                "expected a string for fact name, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FactName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
