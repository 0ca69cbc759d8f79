use std::path::PathBuf;

use thiserror::Error;

/// Setup-level failures that abort a run before (or after) any repository
/// is processed. Per-repository problems are outcomes, not errors.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] reposync_core::ConfigError),

    #[error("git is not available")]
    GitUnavailable(#[source] reposync_sync::SyncError),

    #[error("cannot open run log")]
    Log(#[source] reposync_sync::SyncError),

    #[error("failed to serialize run summary")]
    Json(#[from] serde_json::Error),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RunnerError {
    RunnerError::Io {
        path: path.into(),
        source,
    }
}
