//! Git command layer.
//!
//! [`GitOps`] is the seam between the state machine and `git`. [`GitCli`]
//! shells out to the `git` binary with `tokio::process`; every child is
//! spawned with `kill_on_drop`, so a bounded command that times out (or a
//! worker that is aborted) never leaves a `git` process behind.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::SyncError;

/// Result of a mutating git command: whether it exited zero, plus its
/// combined stdout/stderr for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub success: bool,
    pub text: String,
}

impl GitOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
        }
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            success: false,
            text: text.into(),
        }
    }

    fn from_output(output: Output) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let text = [stdout.trim(), stderr.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            success: output.status.success(),
            text,
        }
    }
}

/// One line of `git stash list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashEntry {
    /// `stash@{n}`
    pub reference: String,
    /// Reflog subject, e.g. `On feature: reposync-auto-stash-…`.
    pub subject: String,
}

/// Git operations used by the state machine. Paths are repository working
/// directories; no implementation may change the process working directory.
#[async_trait]
pub trait GitOps: Send + Sync {
    async fn is_repo(&self, dir: &Path) -> bool;

    /// `None` when HEAD is detached.
    async fn current_branch(&self, dir: &Path) -> Result<Option<String>, SyncError>;

    /// Porcelain status lines: modified, staged, and untracked paths.
    async fn status_porcelain(&self, dir: &Path) -> Result<Vec<String>, SyncError>;

    async fn rev_list_count(&self, dir: &Path, range: &str) -> Result<u64, SyncError>;

    async fn remote_exists(&self, dir: &Path, remote: &str) -> bool;

    async fn remote_reachable(&self, dir: &Path, remote: &str, timeout: Duration) -> bool;

    /// Default branch from the HEAD symref the remote advertises.
    async fn symbolic_default_branch(
        &self,
        dir: &Path,
        remote: &str,
        timeout: Duration,
    ) -> Option<String>;

    /// Default branch from the locally cached `refs/remotes/<remote>/HEAD`.
    async fn cached_default_branch(&self, dir: &Path, remote: &str) -> Option<String>;

    /// Default branch parsed from `git remote show`.
    async fn remote_show_default_branch(
        &self,
        dir: &Path,
        remote: &str,
        timeout: Duration,
    ) -> Option<String>;

    async fn branch_exists_on_remote(
        &self,
        dir: &Path,
        remote: &str,
        branch: &str,
        timeout: Duration,
    ) -> bool;

    async fn checkout(&self, dir: &Path, branch: &str) -> Result<GitOutput, SyncError>;

    async fn pull(
        &self,
        dir: &Path,
        remote: &str,
        branch: &str,
        timeout: Duration,
    ) -> Result<GitOutput, SyncError>;

    async fn stash_push(
        &self,
        dir: &Path,
        label: &str,
        include_untracked: bool,
    ) -> Result<GitOutput, SyncError>;

    async fn stash_list(&self, dir: &Path) -> Result<Vec<StashEntry>, SyncError>;

    /// With `restore_index`, staged changes come back staged (`--index`).
    async fn stash_pop(
        &self,
        dir: &Path,
        reference: &str,
        restore_index: bool,
    ) -> Result<GitOutput, SyncError>;
}

// ---------------------------------------------------------------------------
// GitCli
// ---------------------------------------------------------------------------

/// [`GitOps`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `git --version`; used as the setup check before any repository runs.
    pub async fn version(&self) -> Result<String, SyncError> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SyncError::GitSpawn {
                args: "--version".to_string(),
                source,
            })?;
        let out = GitOutput::from_output(output);
        if !out.success {
            return Err(SyncError::GitFailed {
                args: "--version".to_string(),
                stderr: out.text,
            });
        }
        Ok(out.text)
    }

    async fn run(
        &self,
        dir: &Path,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<(GitOutput, Option<i32>), SyncError> {
        let joined = args.join(" ");
        tracing::trace!("git {joined} (in {})", dir.display());

        let child = Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SyncError::GitSpawn {
                args: joined.clone(),
                source,
            })?;

        let waited = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| SyncError::GitTimeout {
                    args: joined.clone(),
                    timeout: limit,
                })?,
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|source| SyncError::GitSpawn {
            args: joined,
            source,
        })?;
        let code = output.status.code();
        Ok((GitOutput::from_output(output), code))
    }

    /// Run a read-only command whose stdout is required.
    async fn read(&self, dir: &Path, args: &[&str]) -> Result<String, SyncError> {
        let (out, _) = self.run(dir, args, None).await?;
        if !out.success {
            return Err(SyncError::GitFailed {
                args: args.join(" "),
                stderr: out.text,
            });
        }
        Ok(out.text)
    }

    async fn succeeds(&self, dir: &Path, args: &[&str], timeout: Option<Duration>) -> bool {
        matches!(self.run(dir, args, timeout).await, Ok((out, _)) if out.success)
    }

    async fn mutate(
        &self,
        dir: &Path,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<GitOutput, SyncError> {
        self.run(dir, args, timeout).await.map(|(out, _)| out)
    }
}

#[async_trait]
impl GitOps for GitCli {
    async fn is_repo(&self, dir: &Path) -> bool {
        // `.git` is a directory in normal clones and a file in worktrees/submodules.
        if tokio::fs::metadata(dir.join(".git")).await.is_err() {
            return false;
        }
        // An empty or broken `.git` makes git fall through to an enclosing
        // repository, so the toplevel must be `dir` itself.
        let Ok(toplevel) = self.read(dir, &["rev-parse", "--show-toplevel"]).await else {
            return false;
        };
        match (
            tokio::fs::canonicalize(toplevel.trim()).await,
            tokio::fs::canonicalize(dir).await,
        ) {
            (Ok(toplevel), Ok(dir)) => toplevel == dir,
            _ => false,
        }
    }

    async fn current_branch(&self, dir: &Path) -> Result<Option<String>, SyncError> {
        let args = ["symbolic-ref", "--quiet", "--short", "HEAD"];
        let (out, code) = self.run(dir, &args, None).await?;
        match (out.success, code) {
            (true, _) if !out.text.is_empty() => Ok(Some(out.text)),
            (true, _) | (false, Some(1)) => Ok(None),
            (false, _) => Err(SyncError::GitFailed {
                args: args.join(" "),
                stderr: out.text,
            }),
        }
    }

    async fn status_porcelain(&self, dir: &Path) -> Result<Vec<String>, SyncError> {
        let text = self.read(dir, &["status", "--porcelain"]).await?;
        Ok(text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn rev_list_count(&self, dir: &Path, range: &str) -> Result<u64, SyncError> {
        let text = self.read(dir, &["rev-list", "--count", range]).await?;
        text.trim().parse().map_err(|_| SyncError::GitFailed {
            args: format!("rev-list --count {range}"),
            stderr: format!("unexpected count output '{text}'"),
        })
    }

    async fn remote_exists(&self, dir: &Path, remote: &str) -> bool {
        self.succeeds(dir, &["remote", "get-url", remote], None).await
    }

    async fn remote_reachable(&self, dir: &Path, remote: &str, timeout: Duration) -> bool {
        self.succeeds(dir, &["ls-remote", "--heads", remote], Some(timeout))
            .await
    }

    async fn symbolic_default_branch(
        &self,
        dir: &Path,
        remote: &str,
        timeout: Duration,
    ) -> Option<String> {
        let (out, _) = self
            .run(dir, &["ls-remote", "--symref", remote, "HEAD"], Some(timeout))
            .await
            .ok()?;
        out.success.then(|| parse_symref_head(&out.text)).flatten()
    }

    async fn cached_default_branch(&self, dir: &Path, remote: &str) -> Option<String> {
        let reference = format!("refs/remotes/{remote}/HEAD");
        let text = self
            .read(dir, &["symbolic-ref", "--quiet", reference.as_str()])
            .await
            .ok()?;
        strip_remote_prefix(&text, remote)
    }

    async fn remote_show_default_branch(
        &self,
        dir: &Path,
        remote: &str,
        timeout: Duration,
    ) -> Option<String> {
        let (out, _) = self
            .run(dir, &["remote", "show", remote], Some(timeout))
            .await
            .ok()?;
        out.success.then(|| parse_remote_show_head(&out.text)).flatten()
    }

    async fn branch_exists_on_remote(
        &self,
        dir: &Path,
        remote: &str,
        branch: &str,
        timeout: Duration,
    ) -> bool {
        let head = format!("refs/heads/{branch}");
        self.succeeds(
            dir,
            &["ls-remote", "--exit-code", "--heads", remote, head.as_str()],
            Some(timeout),
        )
        .await
    }

    async fn checkout(&self, dir: &Path, branch: &str) -> Result<GitOutput, SyncError> {
        self.mutate(dir, &["checkout", branch], None).await
    }

    async fn pull(
        &self,
        dir: &Path,
        remote: &str,
        branch: &str,
        timeout: Duration,
    ) -> Result<GitOutput, SyncError> {
        // Fast-forward only: a diverged branch is reported, never rewritten.
        self.mutate(dir, &["pull", "--ff-only", remote, branch], Some(timeout))
            .await
    }

    async fn stash_push(
        &self,
        dir: &Path,
        label: &str,
        include_untracked: bool,
    ) -> Result<GitOutput, SyncError> {
        let mut args = vec!["stash", "push"];
        if include_untracked {
            args.push("--include-untracked");
        }
        args.extend(["-m", label]);
        self.mutate(dir, &args, None).await
    }

    async fn stash_list(&self, dir: &Path) -> Result<Vec<StashEntry>, SyncError> {
        let text = self
            .read(dir, &["stash", "list", "--format=%gd%x09%gs"])
            .await?;
        Ok(parse_stash_list(&text))
    }

    async fn stash_pop(
        &self,
        dir: &Path,
        reference: &str,
        restore_index: bool,
    ) -> Result<GitOutput, SyncError> {
        let mut args = vec!["stash", "pop"];
        if restore_index {
            args.push("--index");
        }
        args.push(reference);
        self.mutate(dir, &args, None).await
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// `ref: refs/heads/main\tHEAD` → `main`
pub(crate) fn parse_symref_head(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let rest = line.strip_prefix("ref:")?.trim();
        let (reference, target) = rest.split_once(char::is_whitespace)?;
        if target.trim() != "HEAD" {
            return None;
        }
        reference
            .strip_prefix("refs/heads/")
            .filter(|b| !b.is_empty())
            .map(str::to_string)
    })
}

/// `refs/remotes/origin/main` → `main`
pub(crate) fn strip_remote_prefix(text: &str, remote: &str) -> Option<String> {
    let prefix = format!("refs/remotes/{remote}/");
    text.trim()
        .strip_prefix(&prefix)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
}

/// Finds `HEAD branch: main` in `git remote show` output.
pub(crate) fn parse_remote_show_head(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let branch = line.trim().strip_prefix("HEAD branch:")?.trim();
        (!branch.is_empty() && branch != "(unknown)").then(|| branch.to_string())
    })
}

pub(crate) fn parse_stash_list(text: &str) -> Vec<StashEntry> {
    text.lines()
        .filter_map(|line| {
            let (reference, subject) = line.split_once('\t')?;
            Some(StashEntry {
                reference: reference.trim().to_string(),
                subject: subject.trim().to_string(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("ref: refs/heads/main\tHEAD\n1a2b3c\tHEAD", Some("main"))]
    #[case("ref: refs/heads/release/2.x\tHEAD", Some("release/2.x"))]
    #[case("1a2b3c\tHEAD", None)]
    #[case("ref: refs/heads/main\trefs/heads/other", None)]
    #[case("", None)]
    fn symref_head_parsing(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(parse_symref_head(text).as_deref(), expected);
    }

    #[test]
    fn remote_prefix_is_stripped_for_matching_remote_only() {
        assert_eq!(
            strip_remote_prefix("refs/remotes/origin/trunk\n", "origin").as_deref(),
            Some("trunk")
        );
        assert_eq!(strip_remote_prefix("refs/remotes/upstream/main", "origin"), None);
        assert_eq!(strip_remote_prefix("refs/remotes/origin/", "origin"), None);
    }

    #[test]
    fn remote_show_head_branch_is_found() {
        let text = "* remote origin\n  Fetch URL: git@example.com:x.git\n  HEAD branch: develop\n  Remote branches:\n";
        assert_eq!(parse_remote_show_head(text).as_deref(), Some("develop"));
        assert_eq!(parse_remote_show_head("  HEAD branch: (unknown)"), None);
    }

    #[test]
    fn stash_list_lines_split_on_tab() {
        let text = "stash@{0}\tOn feature: reposync-auto-stash-repoB-1\nstash@{1}\tWIP on main: abc msg";
        let entries = parse_stash_list(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].reference, "stash@{0}");
        assert!(entries[0].subject.ends_with("reposync-auto-stash-repoB-1"));
        assert_eq!(entries[1].reference, "stash@{1}");
    }

    #[tokio::test]
    async fn missing_git_binary_is_a_spawn_error() {
        let git = GitCli::with_program("/nonexistent/reposync-git");
        let err = git.version().await.unwrap_err();
        assert!(matches!(err, SyncError::GitSpawn { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn plain_directory_is_not_a_repo() {
        let dir = tempfile::TempDir::new().expect("dir");
        assert!(!GitCli::default().is_repo(dir.path()).await);
        std::fs::create_dir(dir.path().join(".git")).expect("mkdir");
        assert!(GitCli::default().is_repo(dir.path()).await);
    }
}
