//! Repository discovery: immediate subdirectories of the root.

use std::path::Path;

use crate::error::{io_err, ConfigError};
use crate::types::RepositoryDescriptor;

/// List candidate repositories under `root`, sorted by name.
///
/// Hidden directories, non-directories and names in `skip` are left out.
/// Directories that are not git working copies are still returned; the state
/// machine classifies them as skipped.
pub fn discover(root: &Path, skip: &[String]) -> Result<Vec<RepositoryDescriptor>, ConfigError> {
    if !root.is_dir() {
        return Err(ConfigError::RootNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut repos: Vec<RepositoryDescriptor> = std::fs::read_dir(root)
        .map_err(|e| io_err(root, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            !name.starts_with('.') && !skip.iter().any(|s| s.as_str() == name)
        })
        .filter_map(|e| RepositoryDescriptor::from_path(e.path()))
        .collect();
    repos.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(repos)
}
