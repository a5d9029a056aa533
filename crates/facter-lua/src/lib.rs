//! Lua custom facts for facter.
//!
//! This crate embeds a Lua 5.4 interpreter and exposes the `Facter`
//! namespace to plugin files, so facts can be defined in Lua next to the
//! native ones.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │ RuntimeSession                                      │
//! │   Interpreter ── Lua state                          │
//! │   Collection  ── native facts (facter-core)         │
//! │   Bridge      ── Facter namespace, plugin loading   │
//! └─────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ plugin file (memory.lua)                            │
//! │   Facter.add("memory", function(r)                  │
//! │     r:confine("kernel", "Linux")                    │
//! │     r:setcode("free -m | awk 'NR==2{print $2}'")    │
//! │   end)                                              │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Plugin files
//!
//! A lookup of fact `name` first executes `name.lua` from every search
//! directory, then falls back to the native collection, and finally loads
//! every `.lua` file it can find. Each file runs at most once per session.
//!
//! # Example
//!
//! ```no_run
//! use facter_lua::{RuntimeSession, SessionOptions};
//!
//! let options = SessionOptions::new().search_paths(["/etc/facter/facts.d"]);
//! if let Some(session) = RuntimeSession::start(options)? {
//!     if let Some(bridge) = session.bridge() {
//!         println!("{:?}", bridge.value("kernel")?);
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bridge;
pub mod convert;
pub mod error;
pub mod fact;
pub mod interpreter;
pub mod normalize;
pub mod resolution;
pub mod session;

pub use bridge::{Bridge, NAMESPACE, PLUGIN_EXTENSION, SEARCH_PATH_VAR};
pub use error::{BridgeError, SessionError};
pub use fact::Fact;
pub use interpreter::Interpreter;
pub use normalize::{normalize, FactName};
pub use resolution::{AggregateResolution, SimpleResolution};
pub use session::{RuntimeSession, SessionOptions};
