//! Process-wide runtime session.
//!
//! A [`RuntimeSession`] owns the interpreter, the native collection and the
//! bridge for the lifetime of the host. Only one can be live per process.

use crate::bridge::Bridge;
use crate::error::SessionError;
use crate::interpreter::Interpreter;
use facter_core::logging::{self, LogLevel};
use facter_core::{Collection, SharedCollection};
use mlua::{Lua, UserData};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

static SESSION_LIVE: AtomicBool = AtomicBool::new(false);

/// Named registry key of the session anchor.
const ANCHOR_KEY: &str = "facter.session";

/// Marker pinned in the Lua registry while a session is live.
///
/// Unpinned by [`RuntimeSession::stop`]; Lua's collector frees it.
struct SessionAnchor;

impl UserData for SessionAnchor {}

impl Drop for SessionAnchor {
    fn drop(&mut self) {
        debug!("session anchor collected");
    }
}

/// Options for [`RuntimeSession::start`].
#[derive(Debug, Default)]
pub struct SessionOptions {
    log_level: Option<LogLevel>,
    search_paths: Vec<String>,
    external_paths: Vec<String>,
    collection: Option<SharedCollection>,
}

impl SessionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log level for the subscriber. Without one, `RUST_LOG` decides.
    #[must_use]
    pub fn log_level(mut self, level: Option<LogLevel>) -> Self {
        self.log_level = level;
        self
    }

    /// Extra plugin directories.
    #[must_use]
    pub fn search_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// External fact directories.
    #[must_use]
    pub fn external_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.external_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Uses an existing collection instead of a new empty one.
    #[must_use]
    pub fn collection(mut self, collection: SharedCollection) -> Self {
        self.collection = Some(collection);
        self
    }
}

/// The interpreter, collection and bridge of one host process.
pub struct RuntimeSession {
    interpreter: Interpreter,
    collection: Option<SharedCollection>,
    bridge: Option<Bridge>,
}

impl std::fmt::Debug for RuntimeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeSession")
            .field("interpreter", &self.interpreter)
            .field("bridge", &self.bridge)
            .finish()
    }
}

impl RuntimeSession {
    /// Starts the session.
    ///
    /// Returns `Ok(None)` when the interpreter cannot be initialized; the
    /// host then runs without custom facts.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyStarted`] while another session is
    /// live, and a bridge or Lua error if setup fails.
    pub fn start(options: SessionOptions) -> Result<Option<Self>, SessionError> {
        if SESSION_LIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::AlreadyStarted);
        }

        let result = Self::build(options);
        if !matches!(result, Ok(Some(_))) {
            SESSION_LIVE.store(false, Ordering::SeqCst);
        }
        result
    }

    fn build(options: SessionOptions) -> Result<Option<Self>, SessionError> {
        logging::init(options.log_level);

        let mut interpreter = Interpreter::new();
        if let Err(e) = interpreter.initialize() {
            debug!(error = %e, "Lua interpreter unavailable, custom facts disabled");
            return Ok(None);
        }

        let collection = options.collection.unwrap_or_else(Collection::shared);
        let bridge = Bridge::new(&interpreter, collection.clone(), options.search_paths)?;
        bridge.search_external(options.external_paths);

        let lua = bridge.lua();
        let anchor = lua.create_userdata(SessionAnchor)?;
        lua.set_named_registry_value(ANCHOR_KEY, anchor)?;

        debug!("runtime session started");
        Ok(Some(Self {
            interpreter,
            collection: Some(collection),
            bridge: Some(bridge),
        }))
    }

    /// Whether a session is live in this process.
    pub fn is_live() -> bool {
        SESSION_LIVE.load(Ordering::SeqCst)
    }

    pub fn lua(&self) -> Option<&Lua> {
        self.interpreter.lua()
    }

    pub fn bridge(&self) -> Option<&Bridge> {
        self.bridge.as_ref()
    }

    pub fn collection(&self) -> Option<SharedCollection> {
        self.collection.clone()
    }

    /// Releases the bridge and the collection and unpins the anchor.
    ///
    /// Calling it again is a no-op.
    pub fn stop(&mut self) {
        if self.bridge.is_none() && !self.interpreter.initialized() {
            return;
        }

        self.bridge = None;
        self.collection = None;

        if let Some(lua) = self.interpreter.lua() {
            if let Err(e) = lua.unset_named_registry_value(ANCHOR_KEY) {
                debug!(error = %e, "failed to unpin session anchor");
            }
        }
        self.interpreter.shutdown();

        SESSION_LIVE.store(false, Ordering::SeqCst);
        debug!("runtime session stopped");
    }
}

impl Drop for RuntimeSession {
    fn drop(&mut self) {
        self.stop();
    }
}
