//! Conversion between Lua values and fact values.

use facter_core::Value;
use mlua::{Lua, LuaSerdeExt};
use std::collections::BTreeMap;

const MAX_DEPTH: usize = 64;

/// Converts a Lua value into a fact value. `nil` converts to `None`.
///
/// A table whose keys are exactly `1..=n` becomes an array; any other
/// table becomes a map with string keys. An empty table is a map unless it
/// carries the array metatable, which [`to_lua_value`] attaches to arrays.
/// Functions, userdata and threads cannot be stored as facts.
pub fn to_fact_value(lua: &Lua, value: &mlua::Value) -> mlua::Result<Option<Value>> {
    convert(lua, value, 0)
}

/// Converts a fact value into a Lua value.
pub fn to_lua_value(lua: &Lua, value: Option<&Value>) -> mlua::Result<mlua::Value> {
    match value {
        Some(value) => lua.to_value(value),
        None => Ok(mlua::Value::Nil),
    }
}

fn convert(lua: &Lua, value: &mlua::Value, depth: usize) -> mlua::Result<Option<Value>> {
    if depth > MAX_DEPTH {
        return Err(mlua::Error::runtime(
            "fact value is nested too deeply (recursive table?)",
        ));
    }

    Ok(Some(match value {
        mlua::Value::Nil => return Ok(None),
        mlua::Value::Boolean(b) => Value::Boolean(*b),
        mlua::Value::Integer(i) => Value::Integer(*i),
        mlua::Value::Number(n) => Value::Float(*n),
        mlua::Value::String(s) => Value::String(s.to_string_lossy().to_string()),
        mlua::Value::Table(table) => {
            let mut pairs = Vec::new();
            for pair in table.clone().pairs::<mlua::Value, mlua::Value>() {
                pairs.push(pair?);
            }

            let is_array = if pairs.is_empty() {
                table.metatable() == Some(lua.array_metatable())
            } else {
                pairs.len() == table.raw_len()
            };

            if is_array {
                let mut items = Vec::with_capacity(pairs.len());
                for i in 1..=pairs.len() {
                    let item: mlua::Value = table.raw_get(i)?;
                    if let Some(v) = convert(lua, &item, depth + 1)? {
                        items.push(v);
                    }
                }
                Value::Array(items)
            } else {
                let mut map = BTreeMap::new();
                for (key, item) in pairs {
                    let key = match key {
                        mlua::Value::String(s) => s.to_string_lossy().to_string(),
                        mlua::Value::Integer(i) => i.to_string(),
                        mlua::Value::Number(n) => n.to_string(),
                        mlua::Value::Boolean(b) => b.to_string(),
                        other => {
                            return Err(mlua::Error::runtime(format!(
                                "cannot use a {} as a fact map key",
                                other.type_name()
                            )))
                        }
                    };
                    if let Some(v) = convert(lua, &item, depth + 1)? {
                        map.insert(key, v);
                    }
                }
                Value::Map(map)
            }
        }
        other => {
            return Err(mlua::Error::runtime(format!(
                "cannot convert a {} to a fact value",
                other.type_name()
            )))
        }
    }))
}
