//! The `Facter` namespace and plugin loading.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Bridge (Rust owner)                                      │
//! │   inner: Arc<BridgeInner> ──────────────┐                │
//! │   lua:   Lua                             │                │
//! └──────────────────────────────────────────┼───────────────┘
//!                                            │ Weak (app data)
//! ┌──────────────────────────────────────────▼───────────────┐
//! │ Lua state                                                │
//! │   Facter.add / value / fact / ...    (entry points)      │
//! │   Facter.Core.Execution.*            (frozen proxy)      │
//! │   registry: Fact userdata pinned by RegistryKey          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Entry points reach the bridge through a [`Weak`] stored as Lua app
//! data, so a torn-down bridge turns every call into
//! [`BridgeError::RuntimeUnavailable`] instead of touching freed state.
//!
//! # Search paths
//!
//! Plugin directories come from three sources, in order:
//!
//! 1. `facter/` under each `package.path` directory, skipping directories
//!    that hold the `facter.lua` bootstrap file
//! 2. `FACTERLIB`, split on the platform path-list separator
//! 3. paths passed to [`Bridge::new`]
//!
//! Each is canonicalized and deduplicated; paths that do not exist are
//! dropped with a debug log. `Facter.search` appends at runtime.

mod entry_points;

use crate::convert::{to_fact_value, to_lua_value};
use crate::error::{split_backtrace, BridgeError};
use crate::fact::Fact;
use crate::interpreter::{self, Interpreter};
use crate::normalize::FactName;
use facter_core::execution::{self, ExecutionOptions, SHELL, SHELL_COMMAND_FLAG};
use facter_core::{environment, SharedCollection, Value as FactValue, VERSION};
use mlua::{AnyUserData, Lua, RegistryKey, Table, Value};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info};

/// Global table holding the host API.
pub const NAMESPACE: &str = "Facter";

/// Extension of plugin files.
pub const PLUGIN_EXTENSION: &str = "lua";

/// Subdirectory searched under each `package.path` directory.
pub const CONVENTION_DIR: &str = "facter";

/// A directory holding this file is facter's own Lua tree and is skipped.
pub const BOOTSTRAP_FILE: &str = "facter.lua";

/// Environment variable listing extra plugin directories.
pub const SEARCH_PATH_VAR: &str = "FACTERLIB";

/// Module names marked loaded so `require` cannot replace the host API.
const SHADOWED_MODULES: [&str; 4] = [
    "facter",
    "facter.util.resolution",
    "facter.core.aggregate",
    "facter.core.execution",
];

#[derive(Default)]
struct BridgeState {
    facts: BTreeMap<String, RegistryKey>,
    search_paths: Vec<PathBuf>,
    construction_paths: Vec<String>,
    additional_search_paths: Vec<String>,
    external_search_paths: Vec<String>,
    loaded_files: HashSet<PathBuf>,
    debug_messages: HashSet<String>,
    warning_messages: HashSet<String>,
    loaded_all: bool,
}

/// Bridge state shared with the entry points.
pub(crate) struct BridgeInner {
    state: Mutex<BridgeState>,
    collection: SharedCollection,
}

/// App data pointing entry points at the live bridge.
struct BridgeLink(Weak<BridgeInner>);

/// Returns the bridge bound to `lua`.
pub(crate) fn current(lua: &Lua) -> mlua::Result<Arc<BridgeInner>> {
    lua.app_data_ref::<BridgeLink>()
        .and_then(|link| link.0.upgrade())
        .ok_or_else(|| BridgeError::RuntimeUnavailable.into_lua())
}

/// Value of a fact by name, or nil.
pub(crate) fn fact_value(lua: &Lua, name: &str) -> mlua::Result<Value> {
    current(lua)?.fact_value(lua, &FactName::new(name))
}

/// Runs `command` through the shell with stderr merged into the output.
///
/// On success returns the trimmed output. On failure raises
/// [`BridgeError::CommandExecutionFailure`] when `raise` is set, and
/// returns `failure_default` otherwise.
pub(crate) fn execute_command(
    lua: &Lua,
    command: &str,
    failure_default: Value,
    raise: bool,
) -> mlua::Result<Value> {
    let output = {
        let options = ExecutionOptions::default().redirect_stderr(true);
        match execution::expand_command(command) {
            None => {
                debug!(command, "executable not found");
                None
            }
            Some(expanded) => match execution::execute(SHELL, &[SHELL_COMMAND_FLAG, &expanded], options) {
                Ok(result) if result.success => Some(result.output),
                Ok(result) => {
                    debug!(command, status = ?result.status, "command failed");
                    None
                }
                Err(e) => {
                    debug!(command, error = %e, "command could not be run");
                    None
                }
            },
        }
    };

    match output {
        Some(text) => Ok(Value::String(lua.create_string(&text)?)),
        None if raise => Err(BridgeError::CommandExecutionFailure {
            command: command.to_string(),
        }
        .into_lua()),
        None => Ok(failure_default),
    }
}

impl BridgeInner {
    pub(crate) fn collection(&self) -> &SharedCollection {
        &self.collection
    }

    /// Fills the collection with default and external facts if it is empty.
    fn populate(&self) {
        let external = self.state.lock().external_search_paths.clone();
        let mut collection = self.collection.lock();
        if collection.is_empty() {
            collection.add_default_facts();
            collection.add_external_facts(&external);
        }
    }

    fn cached(&self, lua: &Lua, name: &FactName) -> mlua::Result<Option<AnyUserData>> {
        let state = self.state.lock();
        state
            .facts
            .get(name.as_str())
            .map(|key| lua.registry_value::<AnyUserData>(key))
            .transpose()
    }

    fn cached_facts(&self, lua: &Lua) -> mlua::Result<Vec<AnyUserData>> {
        let state = self.state.lock();
        state
            .facts
            .values()
            .map(|key| lua.registry_value::<AnyUserData>(key))
            .collect()
    }

    /// Returns the fact handle, loading plugins as needed.
    pub(crate) fn load_fact(&self, lua: &Lua, name: &FactName) -> mlua::Result<Option<AnyUserData>> {
        if let Some(fact) = self.find_fact(lua, name)? {
            return Ok(Some(fact));
        }

        self.load_facts(lua);

        if let Some(fact) = self.cached(lua, name)? {
            return Ok(Some(fact));
        }

        debug!(fact = %name, "custom fact was not found");
        Ok(None)
    }

    /// Looks in the cache, the name-matched plugin files and the native
    /// collection, without scanning every plugin file.
    pub(crate) fn find_fact(&self, lua: &Lua, name: &FactName) -> mlua::Result<Option<AnyUserData>> {
        if let Some(fact) = self.cached(lua, name)? {
            return Ok(Some(fact));
        }

        let (loaded_all, search_paths) = {
            let state = self.state.lock();
            (state.loaded_all, state.search_paths.clone())
        };

        if !loaded_all {
            let filename = format!("{name}.{PLUGIN_EXTENSION}");
            debug!(fact = %name, "searching for custom fact");

            for directory in &search_paths {
                debug!(file = %filename, dir = %directory.display(), "searching for plugin file");
                let full_path = directory.join(&filename);
                if full_path.is_file() {
                    self.load_file(lua, &full_path);
                }
            }

            if let Some(fact) = self.cached(lua, name)? {
                return Ok(Some(fact));
            }
        }

        self.populate();
        let native = self.collection.lock().get(name.as_str()).is_some();
        if native {
            return self.create_fact(lua, name).map(Some);
        }
        Ok(None)
    }

    /// Executes a plugin file once per session. Failures are logged.
    fn load_file(&self, lua: &Lua, path: &Path) {
        if !self.state.lock().loaded_files.insert(path.to_path_buf()) {
            return;
        }

        info!(path = %path.display(), "loading custom facts");

        let result = std::fs::read(path)
            .map_err(mlua::Error::external)
            .and_then(|source| {
                lua.load(source)
                    .set_name(format!("@{}", path.display()))
                    .exec()
            });

        if let Err(e) = result {
            let (message, backtrace) = split_backtrace(&e);
            let err = BridgeError::PluginLoad {
                path: path.display().to_string(),
                message,
            };
            error!("{err}.\nbacktrace:\n{backtrace}");
        }
    }

    /// Loads every plugin file in every search directory.
    pub(crate) fn load_facts(&self, lua: &Lua) {
        let search_paths = {
            let state = self.state.lock();
            if state.loaded_all {
                return;
            }
            state.search_paths.clone()
        };

        debug!("loading all custom facts");
        self.populate();

        for directory in &search_paths {
            debug!(dir = %directory.display(), "searching for custom facts");
            for file in plugin_files(directory) {
                self.load_file(lua, &file);
            }
        }

        self.state.lock().loaded_all = true;
    }

    /// Loads everything and resolves every cached fact.
    pub(crate) fn resolve_facts(&self, lua: &Lua) -> mlua::Result<()> {
        self.populate();
        self.load_facts(lua);

        for fact in self.cached_facts(lua)? {
            fact.borrow::<Fact>()?.value(lua)?;
        }
        Ok(())
    }

    /// Returns the cached fact or creates and pins a new one.
    pub(crate) fn create_fact(&self, lua: &Lua, name: &FactName) -> mlua::Result<AnyUserData> {
        if let Some(fact) = self.cached(lua, name)? {
            return Ok(fact);
        }

        self.populate();

        let fact = lua.create_userdata(Fact::new(name.as_str()))?;
        let key = lua.create_registry_value(fact.clone())?;
        self.state.lock().facts.insert(name.as_str().to_string(), key);
        Ok(fact)
    }

    pub(crate) fn fact_value(&self, lua: &Lua, name: &FactName) -> mlua::Result<Value> {
        match self.load_fact(lua, name)? {
            Some(fact) => fact.borrow::<Fact>()?.value(lua),
            None => Ok(Value::Nil),
        }
    }

    /// Unpins every cached fact, optionally clearing the collection.
    pub(crate) fn clear_facts(&self, lua: &Lua, clear_collection: bool) {
        let facts = std::mem::take(&mut self.state.lock().facts);
        for (name, key) in facts {
            if let Err(e) = lua.remove_registry_value(key) {
                debug!(fact = %name, error = %e, "failed to unpin fact");
            }
        }
        if clear_collection {
            self.collection.lock().clear();
        }
    }

    pub(crate) fn flush(&self, lua: &Lua) -> mlua::Result<()> {
        for fact in self.cached_facts(lua)? {
            fact.borrow::<Fact>()?.flush()?;
        }
        Ok(())
    }

    /// Drops facts and plugin state so the next lookup starts over.
    ///
    /// Construction paths and the dedup message sets survive.
    pub(crate) fn reset(&self, lua: &Lua) {
        self.clear_facts(lua, true);
        let construction = self.state.lock().construction_paths.clone();
        let search_paths = compute_search_paths(lua, &construction);

        let mut state = self.state.lock();
        state.search_paths = search_paths;
        state.additional_search_paths.clear();
        state.external_search_paths.clear();
        state.loaded_files.clear();
        state.loaded_all = false;
    }

    /// Records `paths` and adds the ones that canonicalize.
    pub(crate) fn search(&self, paths: Vec<String>) {
        let mut state = self.state.lock();
        for path in paths {
            let canonical = std::fs::canonicalize(&path);
            state.additional_search_paths.push(path);
            if let Ok(dir) = canonical {
                if !state.search_paths.contains(&dir) {
                    state.search_paths.push(dir);
                }
            }
        }
    }

    pub(crate) fn search_external(&self, paths: Vec<String>) {
        self.state.lock().external_search_paths.extend(paths);
    }

    /// True the first time `message` is passed.
    pub(crate) fn first_debug(&self, message: &str) -> bool {
        self.state.lock().debug_messages.insert(message.to_string())
    }

    /// True the first time `message` is passed.
    pub(crate) fn first_warning(&self, message: &str) -> bool {
        self.state.lock().warning_messages.insert(message.to_string())
    }

    pub(crate) fn additional_search_paths(&self) -> Vec<String> {
        self.state.lock().additional_search_paths.clone()
    }

    pub(crate) fn external_search_paths(&self) -> Vec<String> {
        self.state.lock().external_search_paths.clone()
    }

    /// Collection contents in name order.
    pub(crate) fn snapshot(&self) -> Vec<(String, FactValue)> {
        let collection = self.collection.lock();
        let mut facts = Vec::with_capacity(collection.len());
        collection.each(|name, value| {
            facts.push((name.to_string(), value.clone()));
            true
        });
        facts
    }
}

/// Plugin files in `directory`, sorted by name.
fn plugin_files(directory: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %directory.display(), error = %e, "cannot list directory");
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(PLUGIN_EXTENSION)
        })
        .collect();
    files.sort();
    files
}

fn compute_search_paths(lua: &Lua, construction_paths: &[String]) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    for directory in interpreter::load_path(lua) {
        let Ok(directory) = std::fs::canonicalize(&directory) else {
            continue;
        };
        if directory.join(BOOTSTRAP_FILE).is_file() {
            continue;
        }
        let directory = directory.join(CONVENTION_DIR);
        if directory.is_dir() {
            candidates.push(directory);
        }
    }

    if let Some(value) = environment::get(SEARCH_PATH_VAR) {
        candidates.extend(environment::split_paths(&value).into_iter().map(PathBuf::from));
    }

    candidates.extend(construction_paths.iter().map(PathBuf::from));

    let mut paths = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match std::fs::canonicalize(&candidate) {
            Ok(dir) => {
                if !paths.contains(&dir) {
                    paths.push(dir);
                }
            }
            Err(e) => debug!(
                path = %candidate.display(),
                error = %e,
                "path will not be searched for custom facts"
            ),
        }
    }
    paths
}

/// Owner of the `Facter` namespace in one Lua state.
///
/// Dropping the bridge unpins every fact (the collection is kept),
/// removes `Facter` and restores whatever was bound to it before.
pub struct Bridge {
    inner: Arc<BridgeInner>,
    lua: Lua,
    previous_namespace: Option<RegistryKey>,
    previous_link: Option<BridgeLink>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Bridge")
            .field("facts", &state.facts.len())
            .field("search_paths", &state.search_paths)
            .field("loaded_all", &state.loaded_all)
            .finish()
    }
}

impl Bridge {
    /// Defines `Facter` in the interpreter and binds it to `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::RuntimeUnavailable`] if the interpreter is not
    /// initialized, and a Lua error if the namespace cannot be created.
    pub fn new(
        interpreter: &Interpreter,
        collection: SharedCollection,
        paths: Vec<String>,
    ) -> Result<Self, BridgeError> {
        let lua = interpreter
            .lua()
            .ok_or(BridgeError::RuntimeUnavailable)?
            .clone();

        let search_paths = compute_search_paths(&lua, &paths);
        let inner = Arc::new(BridgeInner {
            state: Mutex::new(BridgeState {
                search_paths,
                construction_paths: paths,
                ..BridgeState::default()
            }),
            collection,
        });

        let globals = lua.globals();
        let previous = globals.raw_get::<Value>(NAMESPACE)?;
        let previous_namespace = if previous.is_nil() {
            None
        } else {
            globals.raw_set(NAMESPACE, Value::Nil)?;
            Some(lua.create_registry_value(previous)?)
        };

        let previous_link = lua.remove_app_data::<BridgeLink>();
        lua.set_app_data(BridgeLink(Arc::downgrade(&inner)));

        let bridge = Self {
            inner,
            lua,
            previous_namespace,
            previous_link,
        };

        let facter = define_namespace(&bridge.lua)?;
        bridge.lua.globals().raw_set(NAMESPACE, facter.clone())?;
        shadow_modules(&bridge.lua, Value::Table(facter))?;

        debug!(search_paths = ?bridge.search_paths(), "Facter namespace defined");
        Ok(bridge)
    }

    /// The Lua state this bridge is bound to.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn collection(&self) -> SharedCollection {
        Arc::clone(&self.inner.collection)
    }

    /// Resolves one fact.
    ///
    /// # Errors
    ///
    /// Returns an error if resolving raises outside a resolution (for
    /// example a cycle) or the value cannot be converted.
    pub fn value(&self, name: &str) -> Result<Option<FactValue>, BridgeError> {
        let value = self.inner.fact_value(&self.lua, &FactName::new(name))?;
        Ok(to_fact_value(&self.lua, &value)?)
    }

    /// Loads all plugins and resolves every fact.
    ///
    /// # Errors
    ///
    /// Returns an error if a fact cannot be resolved.
    pub fn resolve_facts(&self) -> Result<(), BridgeError> {
        Ok(self.inner.resolve_facts(&self.lua)?)
    }

    /// Resolves every fact and returns the collection contents.
    ///
    /// # Errors
    ///
    /// Same as [`Bridge::resolve_facts`].
    pub fn to_hash(&self) -> Result<BTreeMap<String, FactValue>, BridgeError> {
        self.resolve_facts()?;
        Ok(self.inner.snapshot().into_iter().collect())
    }

    /// Loads every plugin file not loaded yet.
    pub fn load_facts(&self) {
        self.inner.load_facts(&self.lua);
    }

    /// Flushes every cached fact.
    ///
    /// # Errors
    ///
    /// Returns the error raised by an `on_flush` block.
    pub fn flush(&self) -> Result<(), BridgeError> {
        Ok(self.inner.flush(&self.lua)?)
    }

    /// Drops facts and plugin state; see `Facter.reset`.
    pub fn reset(&self) {
        self.inner.reset(&self.lua);
    }

    /// Adds plugin directories, as `Facter.search` does.
    pub fn search<I, S>(&self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.search(paths.into_iter().map(Into::into).collect());
    }

    /// Adds external fact directories, as `Facter.search_external` does.
    pub fn search_external<I, S>(&self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .search_external(paths.into_iter().map(Into::into).collect());
    }

    /// Canonical plugin directories in search order.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.inner.state.lock().search_paths.clone()
    }

    /// Paths passed to `Facter.search`, verbatim.
    pub fn additional_search_paths(&self) -> Vec<String> {
        self.inner.additional_search_paths()
    }

    pub fn external_search_paths(&self) -> Vec<String> {
        self.inner.external_search_paths()
    }

    /// Plugin files executed so far, sorted.
    pub fn loaded_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.inner.state.lock().loaded_files.iter().cloned().collect();
        files.sort();
        files
    }

    fn teardown(&mut self) -> mlua::Result<()> {
        self.inner.clear_facts(&self.lua, false);

        let globals = self.lua.globals();
        if let Ok(package) = globals.get::<Table>("package") {
            if let Ok(loaded) = package.get::<Table>("loaded") {
                for module in SHADOWED_MODULES {
                    loaded.set(module, Value::Nil)?;
                }
            }
        }

        globals.raw_set(NAMESPACE, Value::Nil)?;
        if let Some(key) = self.previous_namespace.take() {
            let previous = self.lua.registry_value::<Value>(&key)?;
            globals.raw_set(NAMESPACE, previous)?;
            self.lua.remove_registry_value(key)?;
        }

        self.lua.remove_app_data::<BridgeLink>();
        if let Some(link) = self.previous_link.take() {
            self.lua.set_app_data(link);
        }
        Ok(())
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            debug!(error = %e, "Facter namespace teardown incomplete");
        }
    }
}

fn define_namespace(lua: &Lua) -> Result<Table, BridgeError> {
    let facter = lua.create_table()?;
    let core = lua.create_table()?;
    let execution = lua.create_table()?;
    let util = lua.create_table()?;

    entry_points::register(lua, &facter, &execution)?;

    facter.set("FACTERVERSION", VERSION)?;
    facter.set("CFACTERVERSION", VERSION)?;

    // Facter.Core.Execution is a read-only proxy over the real table.
    let frozen = lua.create_table()?;
    let frozen_meta = lua.create_table()?;
    frozen_meta.set("__index", execution)?;
    frozen_meta.set(
        "__newindex",
        lua.create_function(|_, (_table, key, _value): (Value, Value, Value)| -> mlua::Result<()> {
            let key = match &key {
                Value::String(s) => s.to_string_lossy().to_string(),
                other => other.type_name().to_string(),
            };
            Err(mlua::Error::runtime(format!(
                "can't modify frozen module Facter.Core.Execution (assigning \"{key}\")"
            )))
        })?,
    )?;
    frozen_meta.set("__metatable", false)?;
    frozen.set_metatable(Some(frozen_meta));

    core.set("Execution", frozen)?;
    facter.set("Core", core)?;
    facter.set("Util", util)?;

    // Facter[name] resolves to the fact handle. Unlike Facter.fact it never
    // loads every plugin file.
    let facter_meta = lua.create_table()?;
    facter_meta.set(
        "__index",
        lua.create_function(|lua, (_table, key): (Table, Value)| {
            if !matches!(key, Value::String(_)) {
                return Ok(Value::Nil);
            }
            let name = FactName::from_value(lua, &key).map_err(BridgeError::into_lua)?;
            let fact = current(lua)?.find_fact(lua, &name)?;
            Ok(fact.map_or(Value::Nil, Value::UserData))
        })?,
    )?;
    facter.set_metatable(Some(facter_meta));

    Ok(facter)
}

fn shadow_modules(lua: &Lua, facter: Value) -> mlua::Result<()> {
    let loaded: Table = lua.globals().get::<Table>("package")?.get("loaded")?;
    loaded.set(SHADOWED_MODULES[0], facter)?;
    for module in &SHADOWED_MODULES[1..] {
        loaded.set(*module, true)?;
    }
    Ok(())
}

/// Converts a fact value for Lua.
pub(crate) fn fact_to_lua(lua: &Lua, value: &FactValue) -> mlua::Result<Value> {
    to_lua_value(lua, Some(value))
}
