//! Filesystem layout under `~/.reposync/`.
//!
//! ```text
//! ~/.reposync/
//!   config.yaml          optional settings + hooks
//!   logs/reposync.log    shared append-only run log (rotated)
//!   run/<pid>/jobs/      per-job logs, removed after collection
//! ```

use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.yaml";
pub const RUN_LOG: &str = "reposync.log";

pub fn reposync_root(home: &Path) -> PathBuf {
    home.join(".reposync")
}

pub fn default_config_path(home: &Path) -> PathBuf {
    reposync_root(home).join(CONFIG_FILE)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    reposync_root(home).join("logs")
}

pub fn default_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(RUN_LOG)
}

/// Per-process run directory, so concurrent invocations never share job logs.
pub fn run_dir(home: &Path, pid: u32) -> PathBuf {
    reposync_root(home).join("run").join(pid.to_string())
}

pub fn jobs_dir(run_dir: &Path) -> PathBuf {
    run_dir.join("jobs")
}

/// Default repository root: `~/git`.
pub fn default_root(home: &Path) -> PathBuf {
    home.join("git")
}

/// Expand a leading `~` / `~/` against `home`; other paths are returned as-is.
pub fn expand_home(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}
