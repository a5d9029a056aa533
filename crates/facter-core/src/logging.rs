//! Log levels and subscriber setup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::{
    fmt as tfmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Verbosity selected by config or the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
    /// Disable logging.
    None,
}

impl LogLevel {
    /// `EnvFilter` directive for this level.
    #[must_use]
    pub fn directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::None => "off",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            other => other.directive(),
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "none" | "off" => Ok(Self::None),
            other => Err(format!(
                "unknown log level '{other}' (expected trace, debug, info, warn, error or none)"
            )),
        }
    }
}

/// Installs the global stderr subscriber.
///
/// With `None`, `RUST_LOG` decides and the fallback is `warn`. Returns
/// `false` when a global subscriber was already installed, in which case
/// nothing changes.
pub fn init(level: Option<LogLevel>) -> bool {
    let filter = match level {
        Some(level) => EnvFilter::new(level.directive()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LogLevel::default().directive())),
    };

    let layer = tfmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(filter);

    tracing_subscriber::registry().with(layer).try_init().is_ok()
}
