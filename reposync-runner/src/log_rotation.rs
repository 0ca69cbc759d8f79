//! Size-based rotation of the shared run log.
//!
//! `reposync.log` → `reposync.log.1` → … → `reposync.log.<keep>`; the oldest
//! copy falls off the end.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rotate once the live log reaches this size (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Rotated copies kept next to the live log.
pub const KEEP_ROTATED: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct Rotation {
    pub max_bytes: u64,
    pub keep: usize,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            max_bytes: MAX_LOG_BYTES,
            keep: KEEP_ROTATED,
        }
    }
}

impl Rotation {
    /// Shift the log if it is at or over `max_bytes`. A missing log is not an
    /// error. Returns whether a rotation happened.
    pub fn apply(&self, log: &Path) -> io::Result<bool> {
        let len = match fs::metadata(log) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        if len < self.max_bytes || self.keep == 0 {
            return Ok(false);
        }

        remove_if_present(&generation(log, self.keep))?;
        for n in (1..self.keep).rev() {
            let from = generation(log, n);
            if from.exists() {
                fs::rename(&from, generation(log, n + 1))?;
            }
        }
        fs::rename(log, generation(log, 1))?;
        Ok(true)
    }
}

/// Rotate `log` with the default policy, reporting failures through tracing.
pub fn rotate_run_log(log: &Path) {
    match Rotation::default().apply(log) {
        Ok(true) => tracing::info!(path = %log.display(), "run log rotated"),
        Ok(false) => {}
        Err(err) => tracing::warn!(path = %log.display(), error = %err, "run log rotation failed"),
    }
}

fn generation(log: &Path, n: usize) -> PathBuf {
    let mut name = log.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    log.with_file_name(name)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
