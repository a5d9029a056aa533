//! Error types for the Lua bridge.

use thiserror::Error;

/// Errors raised by the bridge and its entry points.
///
/// Entry points hand these to Lua through [`mlua::Error::external`], so
/// the `Display` text is what script code sees.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// An entry point was called with the wrong number of arguments.
    #[error("wrong number of arguments to {function} ({actual} for {expected})")]
    ArgumentCount {
        function: String,
        actual: usize,
        expected: String,
    },

    /// An argument has the wrong Lua type.
    #[error("{0}")]
    ArgumentType(String),

    /// The interpreter is not initialized, or the bridge was torn down.
    #[error("Lua runtime is not available")]
    RuntimeUnavailable,

    /// A plugin file failed while loading. Logged, never raised.
    #[error("error while resolving custom facts in {path}: {message}")]
    PluginLoad { path: String, message: String },

    /// Defining or evaluating a resolution for a fact failed.
    #[error("error while defining resolution for fact \"{fact}\": {message}")]
    ResolutionDefinition { fact: String, message: String },

    /// A command run through `Facter.Core.Execution` failed.
    #[error("execution of command \"{command}\" failed")]
    CommandExecutionFailure { command: String },

    /// The static entry-point table is inconsistent.
    #[error("invalid entry point registration: {0}")]
    Registration(String),

    /// Lua runtime error.
    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),
}

impl BridgeError {
    /// Creates an argument type error.
    pub fn argument_type(message: impl Into<String>) -> Self {
        Self::ArgumentType(message.into())
    }

    /// Converts into an error Lua code can catch with `pcall`.
    pub fn into_lua(self) -> mlua::Error {
        match self {
            Self::Lua(e) => e,
            other => mlua::Error::external(other),
        }
    }
}

/// Errors from [`RuntimeSession`](crate::RuntimeSession).
#[derive(Debug, Error)]
pub enum SessionError {
    /// Another session is live in this process.
    #[error("a facter session is already running in this process")]
    AlreadyStarted,

    /// Bridge construction failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Lua runtime error during setup.
    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),
}

pub(crate) const TRACEBACK_MARKER: &str = "stack traceback:";

/// Splits a Lua error into its message and backtrace.
///
/// Callback errors carry the traceback separately; runtime errors raised
/// from script code have it appended to the message.
pub fn split_backtrace(err: &mlua::Error) -> (String, String) {
    match err {
        mlua::Error::CallbackError { traceback, cause } => {
            let (message, _) = split_backtrace(cause);
            (message, strip_marker(traceback))
        }
        mlua::Error::WithContext { context, cause } => {
            let (message, backtrace) = split_backtrace(cause);
            (format!("{context}: {message}"), backtrace)
        }
        other => {
            let text = match other {
                mlua::Error::RuntimeError(msg) | mlua::Error::SyntaxError { message: msg, .. } => {
                    msg.clone()
                }
                mlua::Error::ExternalError(e) => e.to_string(),
                _ => other.to_string(),
            };
            match text.split_once(TRACEBACK_MARKER) {
                Some((message, trace)) => (
                    message.trim_end().to_string(),
                    trace.trim_start_matches('\n').to_string(),
                ),
                None => (text, String::new()),
            }
        }
    }
}

fn strip_marker(traceback: &str) -> String {
    traceback
        .trim_start()
        .strip_prefix(TRACEBACK_MARKER)
        .unwrap_or(traceback)
        .trim_start_matches('\n')
        .to_string()
}
