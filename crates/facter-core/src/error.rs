//! Error types for the native fact layer.

use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the native collection, execution and configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The child process could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the child's output or waiting on it failed.
    #[error("failed to collect output of '{program}': {source}")]
    Output {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// An external fact file could not be read.
    #[error("failed to read external facts from '{path}': {source}")]
    ExternalRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An external fact file was read but its content is not usable.
    #[error("invalid external facts in '{path}': {message}")]
    ExternalParse { path: PathBuf, message: String },

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// Creates a spawn error.
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Creates an output collection error.
    pub fn output(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Output {
            program: program.into(),
            source,
        }
    }

    /// Creates an external fact parse error.
    pub fn external_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ExternalParse {
            path: path.into(),
            message: message.into(),
        }
    }
}
