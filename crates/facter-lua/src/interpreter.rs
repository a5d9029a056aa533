//! Embedded interpreter handle.

use mlua::{Lua, LuaOptions, StdLib};
use std::path::PathBuf;
use tracing::debug;

/// Owns the embedded Lua state.
///
/// Starts uninitialized; [`Interpreter::initialize`] creates the state with
/// the safe standard libraries.
#[derive(Default)]
pub struct Interpreter {
    lua: Option<Lua>,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("initialized", &self.initialized())
            .finish()
    }
}

impl Interpreter {
    /// Creates an uninitialized handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing Lua state.
    #[must_use]
    pub fn with_lua(lua: Lua) -> Self {
        Self { lua: Some(lua) }
    }

    /// Creates the Lua state if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns the Lua error if the state cannot be created.
    pub fn initialize(&mut self) -> mlua::Result<()> {
        if self.lua.is_none() {
            let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())?;
            debug!("Lua interpreter initialized");
            self.lua = Some(lua);
        }
        Ok(())
    }

    #[must_use]
    pub fn initialized(&self) -> bool {
        self.lua.is_some()
    }

    #[must_use]
    pub fn lua(&self) -> Option<&Lua> {
        self.lua.as_ref()
    }

    /// Drops this handle's reference to the Lua state.
    pub fn shutdown(&mut self) {
        if self.lua.take().is_some() {
            debug!("Lua interpreter shut down");
        }
    }
}

/// Directories named by the templates in `package.path`, in order.
///
/// Each template's directory part (everything before the `?` component)
/// is returned once; templates without a directory are skipped.
pub fn load_path(lua: &Lua) -> Vec<PathBuf> {
    let package_path = lua
        .globals()
        .get::<mlua::Table>("package")
        .and_then(|package| package.get::<String>("path"))
        .unwrap_or_default();

    let mut dirs: Vec<PathBuf> = Vec::new();
    for template in package_path.split(';') {
        let Some(pos) = template.find('?') else {
            continue;
        };
        let dir = template[..pos].trim_end_matches(['/', '\\']);
        if dir.is_empty() || dir == "." {
            continue;
        }
        let dir = PathBuf::from(dir);
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}
