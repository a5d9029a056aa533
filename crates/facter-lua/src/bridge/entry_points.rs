//! Static dispatch table for the `Facter` namespace.
//!
//! Every Lua-callable function is one [`EntryPoint`] row. Arity is checked
//! before the handler runs and excludes the trailing block: when an entry
//! point accepts a block, a trailing Lua function argument is split off as
//! [`Call::block`].

use super::{current, execute_command, fact_to_lua, BridgeInner};
use crate::error::{split_backtrace, BridgeError, TRACEBACK_MARKER};
use crate::fact::Fact;
use crate::normalize::FactName;
use facter_core::execution;
use facter_core::VERSION;
use mlua::{Function, Lua, MultiValue, Table, Value};
use std::collections::HashSet;
use tracing::{debug, error, warn};

/// Target for messages logged on behalf of Lua code.
const LUA_TARGET: &str = "facter::lua";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Namespace {
    Facter,
    Execution,
}

impl Namespace {
    fn path(self) -> &'static str {
        match self {
            Self::Facter => "Facter",
            Self::Execution => "Facter.Core.Execution",
        }
    }
}

/// Accepted positional argument count.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Arity {
    min: usize,
    max: Option<usize>,
}

impl Arity {
    const fn exactly(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }

    const fn between(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    const fn any() -> Self {
        Self { min: 0, max: None }
    }

    fn accepts(self, n: usize) -> bool {
        n >= self.min && self.max.is_none_or(|max| n <= max)
    }

    fn describe(self) -> String {
        match self.max {
            Some(max) if max == self.min => max.to_string(),
            Some(max) => format!("{}..{max}", self.min),
            None => format!("{}+", self.min),
        }
    }
}

/// Arguments of one entry point call.
pub(crate) struct Call {
    pub(crate) args: Vec<Value>,
    pub(crate) block: Option<Function>,
}

impl Call {
    fn arg(&self, index: usize) -> &Value {
        self.args.get(index).unwrap_or(&Value::Nil)
    }
}

type Handler = fn(&Lua, &BridgeInner, Call) -> mlua::Result<Value>;

pub(crate) struct EntryPoint {
    pub(crate) namespace: Namespace,
    pub(crate) name: &'static str,
    pub(crate) arity: Arity,
    pub(crate) block: bool,
    pub(crate) handler: Handler,
}

const fn entry(
    namespace: Namespace,
    name: &'static str,
    arity: Arity,
    block: bool,
    handler: Handler,
) -> EntryPoint {
    EntryPoint {
        namespace,
        name,
        arity,
        block,
        handler,
    }
}

use Namespace::{Execution, Facter};

pub(crate) static ENTRY_POINTS: &[EntryPoint] = &[
    entry(Facter, "version", Arity::exactly(0), false, version),
    entry(Facter, "add", Arity::between(1, 2), true, add),
    entry(Facter, "define_fact", Arity::between(1, 2), true, define_fact),
    entry(Facter, "value", Arity::exactly(1), false, value),
    entry(Facter, "fact", Arity::exactly(1), false, fact),
    entry(Facter, "debug", Arity::exactly(1), false, debug),
    entry(Facter, "debugonce", Arity::exactly(1), false, debugonce),
    entry(Facter, "warn", Arity::exactly(1), false, warn),
    entry(Facter, "warnonce", Arity::exactly(1), false, warnonce),
    entry(Facter, "log_exception", Arity::between(1, 2), false, log_exception),
    entry(Facter, "flush", Arity::exactly(0), false, flush),
    entry(Facter, "list", Arity::exactly(0), false, list),
    entry(Facter, "to_hash", Arity::exactly(0), false, to_hash),
    entry(Facter, "each", Arity::exactly(0), true, each),
    entry(Facter, "clear", Arity::exactly(0), false, clear),
    entry(Facter, "reset", Arity::exactly(0), false, reset),
    entry(Facter, "loadfacts", Arity::exactly(0), false, loadfacts),
    entry(Facter, "search", Arity::any(), false, search),
    entry(Facter, "search_path", Arity::exactly(0), false, search_path),
    entry(Facter, "search_external", Arity::exactly(1), false, search_external),
    entry(Facter, "search_external_path", Arity::exactly(0), false, search_external_path),
    entry(Execution, "which", Arity::exactly(1), false, which),
    entry(Execution, "exec", Arity::exactly(1), false, exec),
    entry(Execution, "execute", Arity::between(1, 2), false, execute),
];

/// Checks the table for duplicate names and inverted arities.
pub(crate) fn validate(entries: &[EntryPoint]) -> Result<(), BridgeError> {
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert((entry.namespace, entry.name)) {
            return Err(BridgeError::Registration(format!(
                "{}.{} is defined twice",
                entry.namespace.path(),
                entry.name
            )));
        }
        if entry.arity.max.is_some_and(|max| max < entry.arity.min) {
            return Err(BridgeError::Registration(format!(
                "{}.{} has maximum arity below its minimum",
                entry.namespace.path(),
                entry.name
            )));
        }
    }
    Ok(())
}

/// Creates a Lua function for every entry point.
pub(crate) fn register(lua: &Lua, facter: &Table, execution: &Table) -> Result<(), BridgeError> {
    validate(ENTRY_POINTS)?;

    for entry in ENTRY_POINTS {
        let function = lua.create_function(move |lua, args: MultiValue| dispatch(lua, entry, args))?;
        let table = match entry.namespace {
            Namespace::Facter => facter,
            Namespace::Execution => execution,
        };
        table.set(entry.name, function)?;
    }
    Ok(())
}

fn dispatch(lua: &Lua, entry: &EntryPoint, args: MultiValue) -> mlua::Result<Value> {
    let mut args: Vec<Value> = args.into_iter().collect();
    let block = if entry.block && matches!(args.last(), Some(Value::Function(_))) {
        match args.pop() {
            Some(Value::Function(f)) => Some(f),
            _ => None,
        }
    } else {
        None
    };

    if !entry.arity.accepts(args.len()) {
        return Err(BridgeError::ArgumentCount {
            function: format!("{}.{}", entry.namespace.path(), entry.name),
            actual: args.len(),
            expected: entry.arity.describe(),
        }
        .into_lua());
    }

    let inner = current(lua)?;
    (entry.handler)(lua, &inner, Call { args, block })
}

// =============================================================================
// Helpers
// =============================================================================

fn fact_name(lua: &Lua, value: &Value) -> mlua::Result<FactName> {
    FactName::from_value(lua, value).map_err(BridgeError::into_lua)
}

/// String form of any Lua value, via the global `tostring`.
fn display(lua: &Lua, value: &Value) -> mlua::Result<String> {
    let tostring: Function = lua.globals().get("tostring")?;
    let text: mlua::String = tostring.call(value.clone())?;
    Ok(text.to_string_lossy().to_string())
}

fn string_arg(value: &Value, what: &str) -> mlua::Result<String> {
    match value {
        Value::String(s) => Ok(s.to_string_lossy().to_string()),
        other => Err(BridgeError::argument_type(format!(
            "expected a string for {what}, got {}",
            other.type_name()
        ))
        .into_lua()),
    }
}

fn optional_table(value: &Value, what: &str) -> mlua::Result<Option<Table>> {
    match value {
        Value::Nil => Ok(None),
        Value::Table(t) => Ok(Some(t.clone())),
        other => Err(BridgeError::argument_type(format!(
            "expected a table for {what}, got {}",
            other.type_name()
        ))
        .into_lua()),
    }
}

fn string_list(lua: &Lua, items: &[String]) -> mlua::Result<Value> {
    Ok(Value::Table(lua.create_sequence_from(items.iter().map(String::as_str))?))
}

// =============================================================================
// Facter
// =============================================================================

fn version(lua: &Lua, _: &BridgeInner, _: Call) -> mlua::Result<Value> {
    Ok(Value::String(lua.create_string(VERSION)?))
}

fn add(lua: &Lua, inner: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let name = fact_name(lua, call.arg(0))?;
    let options = optional_table(call.arg(1), "fact options")?;
    let fact_ud = inner.create_fact(lua, &name)?;

    {
        let fact = fact_ud.borrow::<Fact>()?;
        if let Err(e) = fact.add(lua, options, call.block) {
            fact.set_value_nil();
            return Err(e);
        }
    }
    Ok(Value::UserData(fact_ud))
}

fn define_fact(lua: &Lua, inner: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let name = fact_name(lua, call.arg(0))?;
    let fact_ud = inner.create_fact(lua, &name)?;
    if let Some(block) = &call.block {
        block.call::<()>(fact_ud.clone())?;
    }
    Ok(Value::UserData(fact_ud))
}

fn value(lua: &Lua, inner: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let name = fact_name(lua, call.arg(0))?;
    inner.fact_value(lua, &name)
}

fn fact(lua: &Lua, inner: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let name = fact_name(lua, call.arg(0))?;
    Ok(inner
        .load_fact(lua, &name)?
        .map_or(Value::Nil, Value::UserData))
}

fn debug(lua: &Lua, _: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let message = display(lua, call.arg(0))?;
    debug!(target: LUA_TARGET, "{message}");
    Ok(Value::Nil)
}

fn debugonce(lua: &Lua, inner: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let message = display(lua, call.arg(0))?;
    if inner.first_debug(&message) {
        debug!(target: LUA_TARGET, "{message}");
    }
    Ok(Value::Nil)
}

fn warn(lua: &Lua, _: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let message = display(lua, call.arg(0))?;
    warn!(target: LUA_TARGET, "{message}");
    Ok(Value::Nil)
}

fn warnonce(lua: &Lua, inner: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let message = display(lua, call.arg(0))?;
    if inner.first_warning(&message) {
        warn!(target: LUA_TARGET, "{message}");
    }
    Ok(Value::Nil)
}

fn log_exception(lua: &Lua, _: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let (error_text, backtrace) = match call.arg(0) {
        Value::Error(e) => split_backtrace(e),
        other => {
            let text = display(lua, other)?;
            match text.split_once(TRACEBACK_MARKER) {
                Some((message, trace)) => (
                    message.trim_end().to_string(),
                    trace.trim_start_matches('\n').to_string(),
                ),
                None => (text, String::new()),
            }
        }
    };
    let message = match call.args.get(1) {
        Some(msg) if !msg.is_nil() => display(lua, msg)?,
        _ => error_text,
    };
    error!(target: LUA_TARGET, "{message}.\nbacktrace:\n{backtrace}");
    Ok(Value::Nil)
}

fn flush(lua: &Lua, inner: &BridgeInner, _: Call) -> mlua::Result<Value> {
    inner.flush(lua)?;
    Ok(Value::Nil)
}

fn list(lua: &Lua, inner: &BridgeInner, _: Call) -> mlua::Result<Value> {
    inner.resolve_facts(lua)?;
    let names: Vec<String> = inner.snapshot().into_iter().map(|(name, _)| name).collect();
    string_list(lua, &names)
}

fn to_hash(lua: &Lua, inner: &BridgeInner, _: Call) -> mlua::Result<Value> {
    inner.resolve_facts(lua)?;
    let table = lua.create_table()?;
    for (name, value) in inner.snapshot() {
        table.set(name, fact_to_lua(lua, &value)?)?;
    }
    Ok(Value::Table(table))
}

fn each(lua: &Lua, inner: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let Some(block) = call.block else {
        return Err(BridgeError::argument_type("Facter.each requires a function").into_lua());
    };
    inner.resolve_facts(lua)?;
    for (name, value) in inner.snapshot() {
        let keep_going: Value = block.call((name, fact_to_lua(lua, &value)?))?;
        if matches!(keep_going, Value::Boolean(false)) {
            break;
        }
    }
    Ok(Value::Nil)
}

fn clear(lua: &Lua, inner: &BridgeInner, _: Call) -> mlua::Result<Value> {
    inner.flush(lua)?;
    inner.reset(lua);
    Ok(Value::Nil)
}

fn reset(lua: &Lua, inner: &BridgeInner, _: Call) -> mlua::Result<Value> {
    inner.reset(lua);
    Ok(Value::Nil)
}

fn loadfacts(lua: &Lua, inner: &BridgeInner, _: Call) -> mlua::Result<Value> {
    inner.load_facts(lua);
    Ok(Value::Nil)
}

fn search(_: &Lua, inner: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let paths = call
        .args
        .iter()
        .filter_map(|arg| match arg {
            Value::String(s) => Some(s.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    inner.search(paths);
    Ok(Value::Nil)
}

fn search_path(lua: &Lua, inner: &BridgeInner, _: Call) -> mlua::Result<Value> {
    string_list(lua, &inner.additional_search_paths())
}

fn search_external(_: &Lua, inner: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let Value::Table(list) = call.arg(0) else {
        return Err(BridgeError::argument_type(format!(
            "expected a table of paths for Facter.search_external, got {}",
            call.arg(0).type_name()
        ))
        .into_lua());
    };
    let mut paths = Vec::new();
    for item in list.clone().sequence_values::<Value>() {
        if let Value::String(s) = item? {
            paths.push(s.to_string_lossy().to_string());
        }
    }
    inner.search_external(paths);
    Ok(Value::Nil)
}

fn search_external_path(lua: &Lua, inner: &BridgeInner, _: Call) -> mlua::Result<Value> {
    string_list(lua, &inner.external_search_paths())
}

// =============================================================================
// Facter.Core.Execution
// =============================================================================

fn which(lua: &Lua, _: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let name = string_arg(call.arg(0), "executable name")?;
    match execution::which(&name) {
        Some(path) => Ok(Value::String(lua.create_string(path.to_string_lossy().as_ref())?)),
        None => Ok(Value::Nil),
    }
}

fn exec(lua: &Lua, _: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let command = string_arg(call.arg(0), "command")?;
    execute_command(lua, &command, Value::Nil, true)
}

fn execute(lua: &Lua, _: &BridgeInner, call: Call) -> mlua::Result<Value> {
    let command = string_arg(call.arg(0), "command")?;
    let Some(options) = optional_table(call.arg(1), "execute options")? else {
        return execute_command(lua, &command, Value::Nil, true);
    };

    let on_fail: Value = options.get("on_fail")?;
    let raise = matches!(&on_fail, Value::String(s) if s.to_string_lossy() == "raise");
    if raise {
        execute_command(lua, &command, Value::Nil, true)
    } else {
        debug!(command = %command, "failures will return the on_fail value");
        execute_command(lua, &command, on_fail, false)
    }
}
