//! Resolutions: strategies that compute a fact's value.
//!
//! Two kinds are exposed to Lua as userdata:
//!
//! - [`SimpleResolution`]: one `setcode` block, command or constant
//! - [`AggregateResolution`]: named chunks merged into one value
//!
//! Both share [`ResolutionCore`] for the name, weight, confines and the
//! flush block, and the Lua methods `confine`, `has_weight`, `on_flush`
//! and `name`.

mod aggregate;
mod confine;
mod simple;

pub use aggregate::AggregateResolution;
pub use simple::SimpleResolution;

pub(crate) use confine::Confine;

use crate::error::BridgeError;
use mlua::{AnyUserData, Function, Lua, MultiValue, UserData, UserDataMethods, Value};
use parking_lot::Mutex;

/// Kind of resolution requested through the `type` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    Simple,
    Aggregate,
}

impl ResolutionKind {
    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(Self::Simple),
            "aggregate" => Some(Self::Aggregate),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Aggregate => "aggregate",
        }
    }
}

#[derive(Default)]
struct CoreState {
    weight: Option<i64>,
    confines: Vec<Confine>,
    flush_block: Option<Function>,
}

/// State common to every resolution kind.
pub struct ResolutionCore {
    name: Option<String>,
    state: Mutex<CoreState>,
}

impl ResolutionCore {
    pub(crate) fn new(name: Option<String>) -> Self {
        Self {
            name,
            state: Mutex::new(CoreState::default()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Explicit weight, or the number of confines.
    pub fn weight(&self) -> i64 {
        let state = self.state.lock();
        state
            .weight
            .unwrap_or_else(|| i64::try_from(state.confines.len()).unwrap_or(i64::MAX))
    }

    pub(crate) fn set_weight(&self, weight: i64) {
        self.state.lock().weight = Some(weight);
    }

    pub(crate) fn add_confines(&self, confines: Vec<Confine>) {
        self.state.lock().confines.extend(confines);
    }

    /// True when every confine holds.
    pub(crate) fn suitable(&self, lua: &Lua) -> mlua::Result<bool> {
        let confines = self.state.lock().confines.clone();
        for confine in &confines {
            if !confine.suitable(lua)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Runs the `on_flush` block, if any.
    pub(crate) fn flush(&self) -> mlua::Result<()> {
        let block = self.state.lock().flush_block.clone();
        if let Some(block) = block {
            block.call::<()>(())?;
        }
        Ok(())
    }
}

/// Behavior every resolution userdata provides to its fact.
pub(crate) trait Resolvable: UserData + 'static {
    const KIND: ResolutionKind;

    fn core(&self) -> &ResolutionCore;

    /// Computes the value, ignoring confines.
    fn resolve(&self, lua: &Lua) -> mlua::Result<Value>;

    /// Stores a constant value from the `value` option.
    fn set_constant(&self, value: Value) -> Result<(), BridgeError>;
}

/// A resolution userdata owned by a fact.
#[derive(Clone)]
pub(crate) struct ResolutionHandle {
    pub(crate) kind: ResolutionKind,
    pub(crate) userdata: AnyUserData,
}

impl ResolutionHandle {
    /// Runs `f` against the resolution behind the handle.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&dyn ResolvableDyn) -> R) -> mlua::Result<R> {
        match self.kind {
            ResolutionKind::Simple => {
                let r = self.userdata.borrow::<SimpleResolution>()?;
                Ok(f(&*r))
            }
            ResolutionKind::Aggregate => {
                let r = self.userdata.borrow::<AggregateResolution>()?;
                Ok(f(&*r))
            }
        }
    }
}

/// Object-safe view of [`Resolvable`].
pub(crate) trait ResolvableDyn {
    fn core(&self) -> &ResolutionCore;
    fn resolve(&self, lua: &Lua) -> mlua::Result<Value>;
    fn set_constant(&self, value: Value) -> Result<(), BridgeError>;
}

impl<T: Resolvable> ResolvableDyn for T {
    fn core(&self) -> &ResolutionCore {
        Resolvable::core(self)
    }

    fn resolve(&self, lua: &Lua) -> mlua::Result<Value> {
        Resolvable::resolve(self, lua)
    }

    fn set_constant(&self, value: Value) -> Result<(), BridgeError> {
        Resolvable::set_constant(self, value)
    }
}

/// Registers the methods shared by all resolution kinds.
pub(crate) fn add_common_methods<T: Resolvable, M: UserDataMethods<T>>(methods: &mut M) {
    methods.add_method("name", |_, this, ()| Ok(this.core().name().map(str::to_string)));

    methods.add_method("confine", |_, this, args: MultiValue| {
        let confines = Confine::parse(args)?;
        this.core().add_confines(confines);
        Ok(())
    });

    methods.add_method("has_weight", |_, this, weight: i64| {
        this.core().set_weight(weight);
        Ok(())
    });

    methods.add_method("on_flush", |_, this, block: Function| {
        this.core().state.lock().flush_block = Some(block);
        Ok(())
    });

    methods.add_method("weight", |_, this, ()| Ok(this.core().weight()));

    methods.add_meta_method(mlua::MetaMethod::ToString, |_, this, ()| {
        Ok(match this.core().name() {
            Some(name) => format!("{} resolution \"{name}\"", T::KIND.as_str()),
            None => format!("{} resolution", T::KIND.as_str()),
        })
    });
}
