//! Domain types for a reposync run.
//!
//! A run discovers [`RepositoryDescriptor`]s, assigns each exactly one
//! terminal [`Outcome`], and tallies them into a [`RunSummary`].

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of a repository: the final segment of its directory path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoName(pub String);

impl RepoName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RepoName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RepoName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Repository descriptor
// ---------------------------------------------------------------------------

/// One unit of work. Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    pub name: RepoName,
    pub path: PathBuf,
}

impl RepositoryDescriptor {
    /// Build a descriptor from a directory path, deriving the name from the
    /// final path segment. Returns `None` for paths without one (e.g. `/`).
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = path.file_name()?.to_string_lossy().into_owned();
        Some(Self {
            name: RepoName(name),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal classification of one repository's processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Success,
    Failed,
    /// Not a git working copy, or detached HEAD.
    Skipped,
    Timeout,
    /// The worker terminated without reporting an outcome.
    Unknown,
}

impl Outcome {
    pub const ALL: [Outcome; 5] = [
        Outcome::Success,
        Outcome::Failed,
        Outcome::Skipped,
        Outcome::Timeout,
        Outcome::Unknown,
    ];

    /// Whether this outcome makes the whole run exit non-zero.
    pub fn is_failure(self) -> bool {
        !matches!(self, Outcome::Success | Outcome::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "SUCCESS",
            Outcome::Failed => "FAILED",
            Outcome::Skipped => "SKIPPED",
            Outcome::Timeout => "TIMEOUT",
            Outcome::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stash record
// ---------------------------------------------------------------------------

/// Label prefix shared by every stash this tool creates.
pub const STASH_LABEL_PREFIX: &str = "reposync-auto-stash";

/// A named snapshot of uncommitted work, tied to one repository's processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashRecord {
    pub label: String,
}

impl StashRecord {
    /// Timestamp-derived label, unique per repository to the millisecond.
    pub fn for_repo(repo: &RepoName, at: DateTime<Local>) -> Self {
        Self {
            label: format!(
                "{STASH_LABEL_PREFIX}-{}-{}",
                repo,
                at.format("%Y%m%d-%H%M%S%.3f")
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// Final outcome for one repository, as reported in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoResult {
    pub repo: RepoName,
    pub outcome: Outcome,
    pub elapsed_ms: u64,
}

/// Aggregate counts for a whole run. Serializable so a scheduling wrapper can
/// persist it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timeout: usize,
    pub unknown: usize,
    #[serde(default)]
    pub results: Vec<RepoResult>,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration_ms: 0,
            total: 0,
            success: 0,
            failed: 0,
            skipped: 0,
            timeout: 0,
            unknown: 0,
            results: Vec::new(),
        }
    }

    pub fn record(&mut self, result: RepoResult) {
        self.total += 1;
        match result.outcome {
            Outcome::Success => self.success += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Timeout => self.timeout += 1,
            Outcome::Unknown => self.unknown += 1,
        }
        self.results.push(result);
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        match outcome {
            Outcome::Success => self.success,
            Outcome::Failed => self.failed,
            Outcome::Skipped => self.skipped,
            Outcome::Timeout => self.timeout,
            Outcome::Unknown => self.unknown,
        }
    }

    /// True when every repository ended SUCCESS or SKIPPED.
    pub fn is_success(&self) -> bool {
        Outcome::ALL
            .iter()
            .filter(|o| o.is_failure())
            .all(|o| self.count(*o) == 0)
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// `Total: 5 | Success: 3 | Failed: 1 | Skipped: 1 | Timeout: 0 | Unknown: 0`
    pub fn summary_line(&self) -> String {
        format!(
            "Total: {} | Success: {} | Failed: {} | Skipped: {} | Timeout: {} | Unknown: {}",
            self.total, self.success, self.failed, self.skipped, self.timeout, self.unknown
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
