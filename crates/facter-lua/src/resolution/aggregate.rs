use super::{add_common_methods, Resolvable, ResolutionCore, ResolutionKind};
use crate::convert::{to_fact_value, to_lua_value};
use crate::error::BridgeError;
use facter_core::Value as FactValue;
use mlua::{Function, Lua, MultiValue, Table, UserData, UserDataMethods, Value};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Clone)]
struct Chunk {
    name: String,
    requires: Vec<String>,
    block: Function,
}

#[derive(Default)]
struct AggregateState {
    chunks: Vec<Chunk>,
    aggregate: Option<Function>,
}

/// Resolution built from named chunks.
///
/// Each chunk block receives the results of the chunks it requires. The
/// `aggregate` block receives a table of chunk name to result; without
/// one, results are merged: arrays concatenate and maps merge
/// recursively.
///
/// ```lua
/// Facter.add("networking", {type = "aggregate"}, function(r)
///   r:chunk("primary", function() return {"eth0"} end)
///   r:chunk("all", {require = {"primary"}}, function(primary)
///     return {"lo"}
///   end)
/// end)
/// ```
pub struct AggregateResolution {
    core: ResolutionCore,
    state: Mutex<AggregateState>,
}

impl AggregateResolution {
    pub(crate) fn new(name: Option<String>) -> Self {
        Self {
            core: ResolutionCore::new(name),
            state: Mutex::new(AggregateState::default()),
        }
    }

    fn define_chunk(&self, name: String, args: MultiValue) -> mlua::Result<()> {
        let mut args = args.into_iter();
        let (requires, block) = match (args.next(), args.next()) {
            (Some(Value::Function(block)), None) => (Vec::new(), block),
            (Some(Value::Table(opts)), Some(Value::Function(block))) => {
                (parse_requires(&name, &opts)?, block)
            }
            _ => {
                return Err(BridgeError::argument_type(format!(
                    "chunk \"{name}\" expects an optional options table and a function"
                ))
                .into_lua())
            }
        };

        let mut state = self.state.lock();
        if state.chunks.iter().any(|c| c.name == name) {
            return Err(BridgeError::argument_type(format!(
                "aggregate chunk \"{name}\" is already defined"
            ))
            .into_lua());
        }
        state.chunks.push(Chunk {
            name,
            requires,
            block,
        });
        Ok(())
    }

    fn evaluate_chunk(
        chunk: &Chunk,
        chunks: &[Chunk],
        results: &mut HashMap<String, Value>,
        evaluating: &mut Vec<String>,
    ) -> mlua::Result<Value> {
        if let Some(value) = results.get(&chunk.name) {
            return Ok(value.clone());
        }
        if evaluating.contains(&chunk.name) {
            return Err(mlua::Error::runtime(format!(
                "cycle detected in aggregate chunk \"{}\"",
                chunk.name
            )));
        }
        evaluating.push(chunk.name.clone());

        let mut inputs = Vec::with_capacity(chunk.requires.len());
        for required in &chunk.requires {
            let dependency = chunks
                .iter()
                .find(|c| &c.name == required)
                .ok_or_else(|| {
                    mlua::Error::runtime(format!(
                        "aggregate chunk \"{}\" requires undefined chunk \"{required}\"",
                        chunk.name
                    ))
                })?;
            inputs.push(Self::evaluate_chunk(dependency, chunks, results, evaluating)?);
        }

        let value = chunk.block.call::<Value>(MultiValue::from_vec(inputs))?;
        evaluating.pop();
        results.insert(chunk.name.clone(), value.clone());
        Ok(value)
    }
}

fn parse_requires(name: &str, opts: &Table) -> mlua::Result<Vec<String>> {
    let mut requires = Vec::new();
    for pair in opts.clone().pairs::<String, Value>() {
        let (key, value) = pair?;
        match (key.as_str(), value) {
            ("require", Value::String(s)) => requires.push(s.to_string_lossy().to_string()),
            ("require", Value::Table(list)) => {
                for item in list.sequence_values::<String>() {
                    requires.push(item?);
                }
            }
            (other, _) => {
                return Err(BridgeError::argument_type(format!(
                    "invalid option \"{other}\" for aggregate chunk \"{name}\""
                ))
                .into_lua())
            }
        }
    }
    Ok(requires)
}

/// Merges two chunk results.
fn deep_merge(left: FactValue, right: FactValue) -> Result<FactValue, String> {
    match (left, right) {
        (FactValue::Array(mut a), FactValue::Array(b)) => {
            a.extend(b);
            Ok(FactValue::Array(a))
        }
        (FactValue::Map(mut a), FactValue::Map(b)) => {
            for (key, value) in b {
                let merged = match a.remove(&key) {
                    Some(existing) => deep_merge(existing, value)?,
                    None => value,
                };
                a.insert(key, merged);
            }
            Ok(FactValue::Map(a))
        }
        (a, b) => Err(format!("cannot merge {a} and {b}")),
    }
}

impl Resolvable for AggregateResolution {
    const KIND: ResolutionKind = ResolutionKind::Aggregate;

    fn core(&self) -> &ResolutionCore {
        &self.core
    }

    fn resolve(&self, lua: &Lua) -> mlua::Result<Value> {
        let (chunks, aggregate) = {
            let state = self.state.lock();
            (state.chunks.clone(), state.aggregate.clone())
        };

        let mut results = HashMap::new();
        let mut evaluating = Vec::new();
        let mut ordered = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let value = Self::evaluate_chunk(chunk, &chunks, &mut results, &mut evaluating)?;
            ordered.push((chunk.name.clone(), value));
        }

        if let Some(aggregate) = aggregate {
            let table = lua.create_table()?;
            for (name, value) in ordered {
                table.set(name, value)?;
            }
            return aggregate.call::<Value>(table);
        }

        let mut merged: Option<FactValue> = None;
        for (name, value) in ordered {
            let Some(value) = to_fact_value(lua, &value)? else {
                continue;
            };
            merged = Some(match merged {
                None => value,
                Some(acc) => deep_merge(acc, value).map_err(|e| {
                    mlua::Error::runtime(format!("aggregate chunk \"{name}\": {e}"))
                })?,
            });
        }
        to_lua_value(lua, merged.as_ref())
    }

    fn set_constant(&self, _value: Value) -> Result<(), BridgeError> {
        Err(BridgeError::argument_type(
            "the value option is not supported for aggregate resolutions",
        ))
    }
}

impl UserData for AggregateResolution {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        add_common_methods(methods);

        // r:chunk(name, [options], function)
        methods.add_method(
            "chunk",
            |_, this, (name, rest): (String, MultiValue)| this.define_chunk(name, rest),
        );

        // r:aggregate(function(chunks) ... end)
        methods.add_method("aggregate", |_, this, block: Function| {
            this.state.lock().aggregate = Some(block);
            Ok(())
        });
    }
}
