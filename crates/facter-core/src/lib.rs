//! Native side of facter.
//!
//! This crate holds everything the Lua extension layer consumes but does
//! not implement itself:
//!
//! | Module | Role |
//! |--------|------|
//! | [`collection`] | Native fact storage, default and external facts |
//! | [`value`] | Typed fact values |
//! | [`execution`] | `which` and shell command execution |
//! | [`environment`] | Environment access and [`ScopedEnv`] |
//! | [`config`] | Layered TOML configuration |
//! | [`logging`] | Log levels and subscriber setup |
//!
//! # Example
//!
//! ```
//! use facter_core::{Collection, Value};
//!
//! let mut facts = Collection::new();
//! facts.add("Kernel", Value::from("Linux"));
//! assert_eq!(facts.get("kernel"), Some(&Value::from("Linux")));
//! ```

pub mod collection;
pub mod config;
pub mod environment;
pub mod error;
pub mod execution;
pub mod logging;
pub mod value;

pub use collection::{Collection, SharedCollection};
pub use environment::ScopedEnv;
pub use error::CoreError;
pub use execution::{ExecutionOptions, ExecutionResult};
pub use logging::LogLevel;
pub use value::Value;

/// Version reported to plugins and by the `facterversion` fact.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
