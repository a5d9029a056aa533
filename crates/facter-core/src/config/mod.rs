//! Layered configuration.
//!
//! ```text
//! Priority (highest to lowest):
//!
//! ┌──────────────────────────────────────────────┐
//! │  1. Command-line flags (applied by the CLI)  │
//! ├──────────────────────────────────────────────┤
//! │  2. Environment Variables (FACTER_*)         │
//! ├──────────────────────────────────────────────┤
//! │  3. Explicit config file (--config)          │
//! ├──────────────────────────────────────────────┤
//! │  4. Global Config (~/.facter/facter.toml)    │
//! ├──────────────────────────────────────────────┤
//! │  5. Default Values                           │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Config Field | Type |
//! |----------|--------------|------|
//! | `FACTER_LOG_LEVEL` | `cli.log_level` | [`LogLevel`](crate::LogLevel) |
//! | `FACTER_NO_CUSTOM_FACTS` | `global.no_custom_facts` | bool |
//! | `FACTER_NO_EXTERNAL_FACTS` | `global.no_external_facts` | bool |
//!
//! # Example Configuration
//!
//! ```toml
//! # ~/.facter/facter.toml
//!
//! [global]
//! custom_dirs = ["/etc/facter/plugins"]
//! external_dirs = ["/etc/facter/facts.d"]
//! no_custom_facts = false
//!
//! [cli]
//! log_level = "info"
//! ```

mod error;
mod loader;
mod types;

pub use error::{ConfigError, SettingSource};
pub use loader::ConfigLoader;
pub use types::{CliConfig, FacterConfig, GlobalConfig};

/// Default global config directory.
pub fn default_config_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".facter")
}

/// Default global config file path.
pub fn default_config_path() -> std::path::PathBuf {
    default_config_dir().join("facter.toml")
}
