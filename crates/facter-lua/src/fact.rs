//! The `Fact` userdata.
//!
//! A fact owns its resolutions and caches its resolved value. Resolving
//! picks the suitable resolution with the highest weight that produces a
//! non-nil value; when none does, the native collection's value is used.
//! The result is written back into the collection so that `to_hash` and
//! the host see custom facts next to native ones.

use crate::bridge;
use crate::convert::to_fact_value;
use crate::error::{split_backtrace, BridgeError};
use crate::resolution::{
    AggregateResolution, ResolutionHandle, ResolutionKind, ResolvableDyn, SimpleResolution,
};
use mlua::{AnyUserData, Function, Lua, MultiValue, Table, UserData, UserDataMethods, Value};
use parking_lot::Mutex;
use tracing::{error, warn};

#[derive(Default)]
struct FactState {
    resolutions: Vec<ResolutionHandle>,
    value: Option<Value>,
    resolved: bool,
    resolving: bool,
}

/// A named, lazily resolved fact.
pub struct Fact {
    name: String,
    state: Mutex<FactState>,
}

/// Parsed options of `define_resolution` / `add`.
#[derive(Default)]
struct ResolutionOptions {
    kind: Option<ResolutionKind>,
    weight: Option<i64>,
    value: Option<Value>,
}

impl ResolutionOptions {
    fn parse(fact: &str, options: Option<&Table>) -> mlua::Result<Self> {
        let mut parsed = Self::default();
        let Some(options) = options else {
            return Ok(parsed);
        };

        for pair in options.clone().pairs::<String, Value>() {
            let (key, value) = pair?;
            match key.as_str() {
                "type" => {
                    let kind = match &value {
                        Value::String(s) => ResolutionKind::parse(&s.to_string_lossy()),
                        _ => None,
                    };
                    parsed.kind = Some(kind.ok_or_else(|| {
                        definition_error(
                            fact,
                            "expected resolution type \"simple\" or \"aggregate\"".to_string(),
                        )
                    })?);
                }
                "weight" => match value {
                    Value::Integer(w) => parsed.weight = Some(w),
                    other => {
                        return Err(definition_error(
                            fact,
                            format!("expected an integer weight, got {}", other.type_name()),
                        ))
                    }
                },
                "timeout" => {
                    warn!(fact, "timeout option is not supported and will be ignored");
                }
                "value" => parsed.value = Some(value),
                "name" => {}
                other => {
                    return Err(definition_error(
                        fact,
                        format!("invalid resolution option \"{other}\""),
                    ))
                }
            }
        }
        Ok(parsed)
    }
}

fn definition_error(fact: &str, message: String) -> mlua::Error {
    BridgeError::ResolutionDefinition {
        fact: fact.to_string(),
        message,
    }
    .into_lua()
}

impl Fact {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(FactState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of resolutions defined so far.
    pub fn resolution_count(&self) -> usize {
        self.state.lock().resolutions.len()
    }

    /// Defines a resolution, or returns the existing one with the same
    /// name after applying `options` to it.
    pub(crate) fn define_resolution(
        &self,
        lua: &Lua,
        name: Option<String>,
        options: Option<&Table>,
    ) -> mlua::Result<AnyUserData> {
        let options = ResolutionOptions::parse(&self.name, options)?;

        let existing = name.as_deref().and_then(|wanted| {
            let state = self.state.lock();
            state
                .resolutions
                .iter()
                .find(|handle| {
                    handle
                        .with(|r| r.core().name() == Some(wanted))
                        .unwrap_or(false)
                })
                .cloned()
        });

        let handle = match existing {
            Some(handle) => {
                if let Some(kind) = options.kind {
                    if kind != handle.kind {
                        return Err(definition_error(
                            &self.name,
                            format!(
                                "cannot define {} resolution \"{}\": a {} resolution with that name already exists",
                                kind.as_str(),
                                name.as_deref().unwrap_or_default(),
                                handle.kind.as_str()
                            ),
                        ));
                    }
                }
                handle
            }
            None => {
                let kind = options.kind.unwrap_or(ResolutionKind::Simple);
                let userdata = match kind {
                    ResolutionKind::Simple => lua.create_userdata(SimpleResolution::new(name))?,
                    ResolutionKind::Aggregate => {
                        lua.create_userdata(AggregateResolution::new(name))?
                    }
                };
                let handle = ResolutionHandle { kind, userdata };
                self.state.lock().resolutions.push(handle.clone());
                handle
            }
        };

        if let Some(weight) = options.weight {
            handle.with(|r| r.core().set_weight(weight))?;
        }
        if let Some(value) = options.value {
            handle
                .with(|r| r.set_constant(value))?
                .map_err(|e| definition_error(&self.name, e.to_string()))?;
        }

        Ok(handle.userdata)
    }

    /// Defines a resolution and calls `block` with it.
    pub(crate) fn add(
        &self,
        lua: &Lua,
        options: Option<Table>,
        block: Option<Function>,
    ) -> mlua::Result<AnyUserData> {
        let name = take_name(options.as_ref())?;
        let resolution = self.define_resolution(lua, name, options.as_ref())?;
        if let Some(block) = block {
            block.call::<()>(resolution.clone())?;
        }
        Ok(resolution)
    }

    /// Clears the value after a failed definition.
    pub(crate) fn set_value_nil(&self) {
        let mut state = self.state.lock();
        state.value = None;
        state.resolved = false;
    }

    /// Resolves the value, or returns the cached one.
    ///
    /// # Errors
    ///
    /// Fails when called again while this fact is resolving. Errors
    /// raised by individual resolutions are logged and skipped.
    pub fn value(&self, lua: &Lua) -> mlua::Result<Value> {
        let resolutions = {
            let mut state = self.state.lock();
            if state.resolved {
                return Ok(state.value.clone().unwrap_or(Value::Nil));
            }
            if state.resolving {
                return Err(mlua::Error::runtime(format!(
                    "cycle detected while requesting value of fact \"{}\"",
                    self.name
                )));
            }
            state.resolving = true;
            state.resolutions.clone()
        };

        let result = self.resolve(lua, &resolutions);
        self.state.lock().resolving = false;
        let value = result?;

        let inner = bridge::current(lua)?;
        let value = match value {
            Some(value) => value,
            None => {
                let native = inner.collection().lock().get(&self.name).cloned();
                crate::convert::to_lua_value(lua, native.as_ref())?
            }
        };

        match to_fact_value(lua, &value) {
            Ok(Some(native)) => inner.collection().lock().add(&self.name, native),
            Ok(None) => {
                inner.collection().lock().remove(&self.name);
            }
            Err(e) => {
                error!(fact = %self.name, "value cannot be stored in the collection: {e}");
            }
        }

        let mut state = self.state.lock();
        state.value = (!value.is_nil()).then(|| value.clone());
        state.resolved = true;
        Ok(value)
    }

    fn resolve(&self, lua: &Lua, resolutions: &[ResolutionHandle]) -> mlua::Result<Option<Value>> {
        let mut weighted = Vec::with_capacity(resolutions.len());
        for handle in resolutions {
            weighted.push((handle.with(|r| r.core().weight())?, handle));
        }
        // Stable, so equal weights keep definition order.
        weighted.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, handle) in weighted {
            let outcome = handle.with(|r| -> mlua::Result<Option<Value>> {
                if !r.core().suitable(lua)? {
                    return Ok(None);
                }
                let value = r.resolve(lua)?;
                Ok(match &value {
                    Value::Nil => None,
                    Value::String(s) if s.as_bytes().is_empty() => None,
                    _ => Some(value),
                })
            })?;

            match outcome {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => {}
                Err(e) => {
                    let (message, backtrace) = split_backtrace(&e);
                    error!(
                        "error while resolving custom fact \"{}\": {message}.\nbacktrace:\n{backtrace}",
                        self.name
                    );
                }
            }
        }
        Ok(None)
    }

    /// Runs every `on_flush` block and drops the cached value.
    pub fn flush(&self) -> mlua::Result<()> {
        let resolutions = self.state.lock().resolutions.clone();
        for handle in &resolutions {
            handle.with(|r| r.core().flush())??;
        }
        let mut state = self.state.lock();
        state.value = None;
        state.resolved = false;
        Ok(())
    }
}

/// Removes and returns `options.name`.
pub(crate) fn take_name(options: Option<&Table>) -> mlua::Result<Option<String>> {
    let Some(options) = options else {
        return Ok(None);
    };
    let name = match options.get::<Value>("name")? {
        Value::Nil => None,
        Value::String(s) => Some(s.to_string_lossy().to_string()),
        other => {
            return Err(BridgeError::argument_type(format!(
                "expected a string for resolution name, got {}",
                other.type_name()
            ))
            .into_lua())
        }
    };
    options.set("name", Value::Nil)?;
    Ok(name)
}

/// Splits `([options], [block])` arguments.
pub(crate) fn options_and_block(args: MultiValue) -> mlua::Result<(Option<Table>, Option<Function>)> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (None | Some(Value::Nil), None) => Ok((None, None)),
        (Some(Value::Function(block)), None) => Ok((None, Some(block))),
        (Some(Value::Table(options)), None | Some(Value::Nil)) => Ok((Some(options), None)),
        (None | Some(Value::Nil), Some(Value::Function(block))) => Ok((None, Some(block))),
        (Some(Value::Table(options)), Some(Value::Function(block))) => {
            Ok((Some(options), Some(block)))
        }
        _ => Err(BridgeError::argument_type(
            "expected an optional options table followed by an optional function",
        )
        .into_lua()),
    }
}

impl UserData for Fact {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("name", |_, this, ()| Ok(this.name.clone()));

        methods.add_method("value", |lua, this, ()| this.value(lua));

        methods.add_method("flush", |_, this, ()| this.flush());

        // fact:add([options], [function(resolution) ... end])
        methods.add_method("add", |lua, this, args: MultiValue| {
            let (options, block) = options_and_block(args)?;
            this.add(lua, options, block)
        });

        // fact:define_resolution([name], [options])
        methods.add_method(
            "define_resolution",
            |lua, this, (name, options): (Option<String>, Option<Table>)| {
                this.define_resolution(lua, name, options.as_ref())
            },
        );

        methods.add_meta_method(mlua::MetaMethod::ToString, |_, this, ()| {
            Ok(format!("Facter.fact(\"{}\")", this.name))
        });
    }
}
