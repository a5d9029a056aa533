//! Configuration types.

use crate::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FacterConfig {
    /// Fact-loading settings.
    pub global: GlobalConfig,

    /// Front-end settings.
    pub cli: CliConfig,
}

impl FacterConfig {
    /// Deserializes from TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Merges another config into this one.
    ///
    /// Values from `other` override values in `self` when they differ
    /// from the default. Directory lists are appended.
    pub fn merge(&mut self, other: &Self) {
        self.global.merge(&other.global);
        self.cli.merge(&other.cli);
    }
}

/// `[global]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlobalConfig {
    /// Extra directories searched for Lua fact plugins.
    pub custom_dirs: Vec<PathBuf>,

    /// Directories searched for external fact files.
    pub external_dirs: Vec<PathBuf>,

    /// Skip Lua plugin loading entirely.
    pub no_custom_facts: bool,

    /// Skip external fact files.
    pub no_external_facts: bool,
}

impl GlobalConfig {
    fn merge(&mut self, other: &Self) {
        for dir in &other.custom_dirs {
            if !self.custom_dirs.contains(dir) {
                self.custom_dirs.push(dir.clone());
            }
        }
        for dir in &other.external_dirs {
            if !self.external_dirs.contains(dir) {
                self.external_dirs.push(dir.clone());
            }
        }
        if other.no_custom_facts {
            self.no_custom_facts = true;
        }
        if other.no_external_facts {
            self.no_external_facts = true;
        }
    }
}

/// `[cli]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CliConfig {
    /// Log level; `None` defers to `RUST_LOG`.
    pub log_level: Option<LogLevel>,
}

impl CliConfig {
    fn merge(&mut self, other: &Self) {
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
    }
}
