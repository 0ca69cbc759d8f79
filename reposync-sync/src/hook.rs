//! Per-repository hook execution.
//!
//! A hook runs once per repository after syncing, inside the repository's
//! working directory. Argv hooks are spawned directly; only hooks configured
//! with `shell:` go through `sh -c`.

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use reposync_core::{HookCommand, HookSpec, RepositoryDescriptor};

use crate::error::SyncError;
use crate::logger::RepoLogger;

/// What happened when a repository's hook was invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookStatus {
    NotConfigured,
    Succeeded,
    Failed { code: Option<i32> },
    TimedOut,
    /// Dry-run: the hook was reported, not executed.
    Simulated,
}

#[async_trait]
pub trait HookExecutor: Send + Sync {
    /// Run the hook for `repo`, if any. Implementations must not execute
    /// anything when `dry_run` is set.
    async fn run_hook(
        &self,
        repo: &RepositoryDescriptor,
        log: &RepoLogger,
        dry_run: bool,
    ) -> Result<HookStatus, SyncError>;
}

/// Executor with no hooks configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

#[async_trait]
impl HookExecutor for NoHooks {
    async fn run_hook(
        &self,
        _repo: &RepositoryDescriptor,
        _log: &RepoLogger,
        _dry_run: bool,
    ) -> Result<HookStatus, SyncError> {
        Ok(HookStatus::NotConfigured)
    }
}

/// Hooks keyed by repository name, as loaded from the config file.
#[derive(Debug, Clone, Default)]
pub struct CommandHooks {
    hooks: BTreeMap<String, HookSpec>,
}

impl CommandHooks {
    pub fn new(hooks: BTreeMap<String, HookSpec>) -> Self {
        Self { hooks }
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[async_trait]
impl HookExecutor for CommandHooks {
    async fn run_hook(
        &self,
        repo: &RepositoryDescriptor,
        log: &RepoLogger,
        dry_run: bool,
    ) -> Result<HookStatus, SyncError> {
        let Some(spec) = self.hooks.get(repo.name.as_str()) else {
            return Ok(HookStatus::NotConfigured);
        };
        let display = spec.command.display();

        if dry_run {
            log.info(format!("[DRY-RUN] would run hook: {display}")).await;
            return Ok(HookStatus::Simulated);
        }
        log.info(format!("running hook: {display}")).await;

        let mut command = match &spec.command {
            HookCommand::Exec { program, args } => {
                let mut c = Command::new(program);
                c.args(args);
                c
            }
            HookCommand::Shell(script) => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(script);
                c
            }
        };
        let child = command
            .current_dir(&repo.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SyncError::HookSpawn {
                command: display.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(waited) => waited.map_err(|source| SyncError::HookSpawn {
                command: display.clone(),
                source,
            })?,
            Err(_) => return Ok(HookStatus::TimedOut),
        };

        log.output("hook", &String::from_utf8_lossy(&output.stdout));
        log.output("hook", &String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(HookStatus::Succeeded)
        } else {
            Ok(HookStatus::Failed {
                code: output.status.code(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::logger::SynchronizedLogger;

    fn setup(name: &str, spec: HookSpec) -> (TempDir, RepositoryDescriptor, CommandHooks, RepoLogger) {
        let dir = TempDir::new().expect("dir");
        let repo_path = dir.path().join(name);
        std::fs::create_dir(&repo_path).expect("mkdir");
        let repo = RepositoryDescriptor::from_path(repo_path).expect("descriptor");
        let hooks = CommandHooks::new(BTreeMap::from([(name.to_string(), spec)]));
        let log = Arc::new(SynchronizedLogger::console_only(false).without_console())
            .for_job(&repo.name, None)
            .expect("logger");
        (dir, repo, hooks, log)
    }

    fn shell(script: &str, timeout: Duration) -> HookSpec {
        HookSpec {
            command: HookCommand::Shell(script.to_string()),
            timeout,
        }
    }

    #[tokio::test]
    async fn hook_runs_inside_repository_directory() {
        let (_dir, repo, hooks, log) = setup("site", shell("touch ran-here", Duration::from_secs(10)));
        let status = hooks.run_hook(&repo, &log, false).await.expect("hook");
        assert_eq!(status, HookStatus::Succeeded);
        assert!(repo.path.join("ran-here").exists());
    }

    #[tokio::test]
    async fn argv_hook_reports_exit_code() {
        let spec = HookSpec {
            command: HookCommand::Exec {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "exit 3".to_string()],
            },
            timeout: Duration::from_secs(10),
        };
        let (_dir, repo, hooks, log) = setup("site", spec);
        let status = hooks.run_hook(&repo, &log, false).await.expect("hook");
        assert_eq!(status, HookStatus::Failed { code: Some(3) });
    }

    #[tokio::test]
    async fn slow_hook_times_out() {
        let (_dir, repo, hooks, log) = setup("site", shell("sleep 5", Duration::from_millis(100)));
        let status = hooks.run_hook(&repo, &log, false).await.expect("hook");
        assert_eq!(status, HookStatus::TimedOut);
    }

    #[tokio::test]
    async fn dry_run_executes_nothing() {
        let (_dir, repo, hooks, log) = setup("site", shell("touch ran-here", Duration::from_secs(10)));
        let status = hooks.run_hook(&repo, &log, true).await.expect("hook");
        assert_eq!(status, HookStatus::Simulated);
        assert!(!repo.path.join("ran-here").exists());
    }

    #[tokio::test]
    async fn unconfigured_repository_has_no_hook() {
        let (_dir, _repo, hooks, log) = setup("site", shell("true", Duration::from_secs(1)));
        let other = RepositoryDescriptor::from_path("/tmp/other").expect("descriptor");
        let status = hooks.run_hook(&other, &log, false).await.expect("hook");
        assert_eq!(status, HookStatus::NotConfigured);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let spec = HookSpec {
            command: HookCommand::Exec {
                program: "/nonexistent/reposync-hook".to_string(),
                args: vec![],
            },
            timeout: Duration::from_secs(1),
        };
        let (_dir, repo, hooks, log) = setup("site", spec);
        let err = hooks.run_hook(&repo, &log, false).await.unwrap_err();
        assert!(matches!(err, SyncError::HookSpawn { .. }), "got: {err}");
    }
}
