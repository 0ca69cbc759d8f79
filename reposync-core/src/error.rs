//! Error types for reposync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while resolving settings or discovering repositories.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid YAML or has unknown keys.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// An explicitly requested config file does not exist.
    #[error("config file not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// A hook entry failed validation.
    #[error("invalid hook for '{repo}': {reason}")]
    InvalidHook { repo: String, reason: String },

    /// A numeric setting was zero, negative, or not a number.
    #[error("invalid value for {setting}: '{value}' ({reason})")]
    InvalidSetting {
        setting: &'static str,
        value: String,
        reason: &'static str,
    },

    /// The repository root directory is missing or not a directory.
    #[error("root directory not found: {path}")]
    RootNotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
