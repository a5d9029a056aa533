//! Configuration loader with hierarchical merging.
//!
//! # Load Order
//!
//! 1. Default values
//! 2. Global config (`~/.facter/facter.toml`)
//! 3. Explicit config file
//! 4. Environment variables (`FACTER_*`)
//!
//! Each layer overrides the previous.

use super::{default_config_path, ConfigError, FacterConfig, SettingSource};
use crate::logging::LogLevel;
use std::path::{Path, PathBuf};
use tracing::debug;

macro_rules! parse_env_bool {
    ($field:expr, $var:literal) => {
        if let Ok(val) = std::env::var($var) {
            $field = parse_bool(&val).ok_or(ConfigError::InvalidFlag {
                name: $var,
                value: val,
            })?;
        }
    };
}

/// Configuration loader with builder pattern.
///
/// # Example
///
/// ```no_run
/// use facter_core::config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .with_config_file("/etc/facter/facter.toml")
///     .skip_env_vars()
///     .load()?;
/// # Ok::<(), facter_core::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Global config file path (defaults to ~/.facter/facter.toml).
    global_config_path: Option<PathBuf>,

    /// File given on the command line; must exist when set.
    config_file: Option<PathBuf>,

    skip_env: bool,
    skip_global: bool,
}

impl ConfigLoader {
    /// Creates a new loader with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a custom global config path.
    #[must_use]
    pub fn with_global_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Sets an explicit config file layered over the global one.
    #[must_use]
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Skips environment variable loading.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Skips global config loading.
    #[must_use]
    pub fn skip_global_config(mut self) -> Self {
        self.skip_global = true;
        self
    }

    /// Loads and merges configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a config file exists but cannot be
    /// parsed, if the explicit config file cannot be read, or if a
    /// `FACTER_*` variable holds an invalid value. A missing global file
    /// is ignored.
    pub fn load(&self) -> Result<FacterConfig, ConfigError> {
        let mut config = FacterConfig::default();

        if !self.skip_global {
            let global_path = self
                .global_config_path
                .clone()
                .unwrap_or_else(default_config_path);

            if global_path.exists() {
                let global = load_file(&global_path)?;
                debug!(path = %global_path.display(), "Loaded global config");
                config.merge(&global);
            }
        }

        if let Some(ref path) = self.config_file {
            let explicit = load_file(path)?;
            debug!(path = %path.display(), "Loaded config file");
            config.merge(&explicit);
        }

        if !self.skip_env {
            apply_env_vars(&mut config)?;
        }

        Ok(config)
    }
}

fn load_file(path: &Path) -> Result<FacterConfig, ConfigError> {
    let parse_error = |source: toml::de::Error| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    };
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    let mut table: toml::Table = content.parse().map_err(parse_error)?;
    canonical_log_level(&mut table, path)?;
    toml::Value::Table(table).try_into().map_err(parse_error)
}

/// Rewrites `[cli] log_level` to its canonical name so the file accepts the
/// same spellings as `--log-level` and `FACTER_LOG_LEVEL`.
fn canonical_log_level(table: &mut toml::Table, path: &Path) -> Result<(), ConfigError> {
    let Some(toml::Value::Table(cli)) = table.get_mut("cli") else {
        return Ok(());
    };
    let Some(toml::Value::String(name)) = cli.get("log_level") else {
        return Ok(());
    };
    let level = name
        .parse::<LogLevel>()
        .map_err(|message| ConfigError::InvalidLogLevel {
            origin: SettingSource::File(path.to_path_buf()),
            message,
        })?;
    cli.insert("log_level".into(), toml::Value::String(level.to_string()));
    Ok(())
}

fn apply_env_vars(config: &mut FacterConfig) -> Result<(), ConfigError> {
    parse_env_bool!(config.global.no_custom_facts, "FACTER_NO_CUSTOM_FACTS");
    parse_env_bool!(config.global.no_external_facts, "FACTER_NO_EXTERNAL_FACTS");

    if let Ok(val) = std::env::var("FACTER_LOG_LEVEL") {
        let level = val
            .parse::<LogLevel>()
            .map_err(|message| ConfigError::InvalidLogLevel {
                origin: SettingSource::Env("FACTER_LOG_LEVEL"),
                message,
            })?;
        config.cli.log_level = Some(level);
    }

    Ok(())
}

/// Parses a boolean from string.
///
/// Accepts: "true", "false", "1", "0", "yes", "no", "on", "off" (case-insensitive).
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
