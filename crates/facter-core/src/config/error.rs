//! Errors raised while layering facter configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Where a rejected setting came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingSource {
    /// A `FACTER_*` environment variable.
    Env(&'static str),
    /// A config file.
    File(PathBuf),
}

impl std::fmt::Display for SettingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env(var) => write!(f, "environment variable {var}"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    /// `--config` named a file that does not exist.
    #[error("config file {} given with --config does not exist", .path.display())]
    MissingConfigFile { path: PathBuf },

    #[error("cannot read facter config {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Covers malformed TOML and unknown `[cli] log_level` names alike.
    #[error("invalid facter config {}: {source}", .path.display())]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{origin}: {message}")]
    InvalidLogLevel {
        origin: SettingSource,
        message: String,
    },

    #[error("{name}={value:?} is not a boolean (use true/false, yes/no, on/off or 1/0)")]
    InvalidFlag { name: &'static str, value: String },
}

impl ConfigError {
    pub(crate) fn read_file(path: &std::path::Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::MissingConfigFile {
                path: path.to_path_buf(),
            };
        }
        Self::ReadFile {
            path: path.to_path_buf(),
            source,
        }
    }

    /// The file the error points at, if any.
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::MissingConfigFile { path }
            | Self::ReadFile { path, .. }
            | Self::ParseToml { path, .. } => Some(path),
            Self::InvalidLogLevel {
                origin: SettingSource::File(path),
                ..
            } => Some(path),
            Self::InvalidLogLevel { .. } | Self::InvalidFlag { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_message_names_variable_and_value() {
        let err = ConfigError::InvalidFlag {
            name: "FACTER_NO_CUSTOM_FACTS",
            value: "maybe".into(),
        };
        assert_eq!(
            err.to_string(),
            "FACTER_NO_CUSTOM_FACTS=\"maybe\" is not a boolean (use true/false, yes/no, on/off or 1/0)"
        );
        assert!(err.path().is_none());
    }

    #[test]
    fn not_found_becomes_missing_config_file() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        let err = ConfigError::read_file(std::path::Path::new("/etc/facter/site.toml"), missing);
        assert!(matches!(err, ConfigError::MissingConfigFile { .. }));
        assert_eq!(
            err.to_string(),
            "config file /etc/facter/site.toml given with --config does not exist"
        );

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let err = ConfigError::read_file(std::path::Path::new("/etc/facter/site.toml"), denied);
        assert!(matches!(err, ConfigError::ReadFile { .. }));
        assert_eq!(err.path(), Some(std::path::Path::new("/etc/facter/site.toml")));
    }

    #[test]
    fn log_level_message_names_origin() {
        let err = ConfigError::InvalidLogLevel {
            origin: SettingSource::Env("FACTER_LOG_LEVEL"),
            message: "unknown log level 'loud'".into(),
        };
        assert_eq!(
            err.to_string(),
            "environment variable FACTER_LOG_LEVEL: unknown log level 'loud'"
        );
    }
}
