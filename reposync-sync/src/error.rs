//! Error types for reposync-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the git layer, hook execution, and the log sink.
///
/// None of these escape a worker: the state machine maps them to a failed
/// outcome or a warning.
#[derive(Debug, Error)]
pub enum SyncError {
    /// `git` could not be spawned or waited on.
    #[error("failed to run git {args}: {source}")]
    GitSpawn {
        args: String,
        #[source]
        source: std::io::Error,
    },

    /// A bounded git command did not finish in time and was killed.
    #[error("git {args} timed out after {}s", .timeout.as_secs())]
    GitTimeout { args: String, timeout: Duration },

    /// A git read returned a non-zero status where output was required.
    #[error("git {args} failed: {stderr}")]
    GitFailed { args: String, stderr: String },

    /// A hook program could not be spawned.
    #[error("failed to run hook `{command}`: {source}")]
    HookSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
