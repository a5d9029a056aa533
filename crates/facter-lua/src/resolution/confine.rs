//! Suitability predicates for resolutions.
//!
//! | Lua call | Confine |
//! |----------|---------|
//! | `r:confine("kernel", "Linux")` | fact value equals one value |
//! | `r:confine("kernel", {"Linux", "Darwin"})` | fact value equals any value |
//! | `r:confine({kernel = "Linux", os = {...}})` | one confine per key |
//! | `r:confine(function() ... end)` | block result is truthy |
//! | `r:confine("kernel", function(v) ... end)` | block over the fact value is truthy |
//!
//! Value comparisons are case-insensitive on the string form of both
//! sides. When the fact value is an array, any element may match.

use crate::bridge;
use crate::convert::to_fact_value;
use crate::error::{split_backtrace, BridgeError};
use facter_core::Value as FactValue;
use mlua::{Function, Lua, MultiValue, Value};
use tracing::error;

/// One applicability predicate.
#[derive(Clone)]
pub(crate) enum Confine {
    Values { fact: String, expected: Vec<String> },
    Block(Function),
    FactBlock { fact: String, block: Function },
}

impl std::fmt::Debug for Confine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Values { fact, expected } => f
                .debug_struct("Values")
                .field("fact", fact)
                .field("expected", expected)
                .finish(),
            Self::Block(_) => f.write_str("Block"),
            Self::FactBlock { fact, .. } => f.debug_struct("FactBlock").field("fact", fact).finish(),
        }
    }
}

impl Confine {
    /// Parses the arguments of a `confine` call.
    pub(crate) fn parse(args: MultiValue) -> mlua::Result<Vec<Confine>> {
        let mut args = args.into_iter();
        let first = args.next().unwrap_or(Value::Nil);
        let second = args.next().unwrap_or(Value::Nil);

        match (first, second) {
            (Value::Function(block), Value::Nil) => Ok(vec![Confine::Block(block)]),
            (Value::Table(table), Value::Nil) => {
                let mut pairs = Vec::new();
                for pair in table.pairs::<String, Value>() {
                    let (fact, value) = pair?;
                    pairs.push((fact.to_lowercase(), value));
                }
                pairs.sort_by(|a, b| a.0.cmp(&b.0));
                pairs
                    .into_iter()
                    .map(|(fact, value)| Confine::for_fact(fact, value))
                    .collect()
            }
            (Value::String(fact), value) => {
                Confine::for_fact(fact.to_string_lossy().to_lowercase(), value).map(|c| vec![c])
            }
            (other, _) => Err(BridgeError::argument_type(format!(
                "expected a fact name, a table or a function for confine, got {}",
                other.type_name()
            ))
            .into_lua()),
        }
    }

    fn for_fact(fact: String, value: Value) -> mlua::Result<Confine> {
        match value {
            Value::Function(block) => Ok(Confine::FactBlock { fact, block }),
            Value::Table(table) => {
                let mut expected = Vec::new();
                for item in table.sequence_values::<Value>() {
                    expected.push(expected_string(&fact, &item?)?);
                }
                Ok(Confine::Values { fact, expected })
            }
            Value::Nil => Err(BridgeError::argument_type(format!(
                "confine for fact \"{fact}\" requires a value"
            ))
            .into_lua()),
            other => {
                let expected = vec![expected_string(&fact, &other)?];
                Ok(Confine::Values { fact, expected })
            }
        }
    }

    /// Evaluates the predicate.
    ///
    /// Errors raised by confine blocks are logged and count as unsuitable.
    pub(crate) fn suitable(&self, lua: &Lua) -> mlua::Result<bool> {
        match self {
            Confine::Values { fact, expected } => {
                let value = bridge::fact_value(lua, fact)?;
                let Some(value) = to_fact_value(lua, &value)? else {
                    return Ok(false);
                };
                Ok(matches_any(&value, expected))
            }
            Confine::Block(block) => Ok(truthy(call_logged(block, Value::Nil, None)?)),
            Confine::FactBlock { fact, block } => {
                let value = bridge::fact_value(lua, fact)?;
                Ok(truthy(call_logged(block, value, Some(fact))?))
            }
        }
    }
}

fn expected_string(fact: &str, value: &Value) -> mlua::Result<String> {
    match value {
        Value::String(s) => Ok(s.to_string_lossy().to_lowercase()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(BridgeError::argument_type(format!(
            "unsupported confine value for fact \"{fact}\": {}",
            other.type_name()
        ))
        .into_lua()),
    }
}

fn matches_any(value: &FactValue, expected: &[String]) -> bool {
    match value {
        FactValue::Array(items) => items.iter().any(|item| matches_any(item, expected)),
        other => {
            let actual = other.to_string().to_lowercase();
            expected.iter().any(|e| *e == actual)
        }
    }
}

fn call_logged(block: &Function, arg: Value, fact: Option<&str>) -> mlua::Result<Value> {
    let result = if arg.is_nil() && fact.is_none() {
        block.call::<Value>(())
    } else {
        block.call::<Value>(arg)
    };
    match result {
        Ok(v) => Ok(v),
        Err(e) => {
            let (message, backtrace) = split_backtrace(&e);
            error!(
                fact = fact.unwrap_or("<block>"),
                "confine block failed: {message}.\nbacktrace:\n{backtrace}"
            );
            Ok(Value::Boolean(false))
        }
    }
}

pub(crate) fn truthy(value: Value) -> bool {
    !matches!(value, Value::Nil | Value::Boolean(false))
}
