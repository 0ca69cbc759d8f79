//! Per-repository state machine.
//!
//! ```text
//! VALIDATING → PROTECTING → SYNCING → HOOK → RESTORING → DONE
//! ```
//!
//! Any state may exit early to DONE with SKIPPED or FAILED. Only three
//! things are fatal once validation passes: a failed stash, an unverifiable
//! stash, and a failed checkout of the default branch. Everything after that
//! (pull, hook, switching back, popping the stash) degrades to a warning with
//! manual recovery instructions.
//!
//! No step ever resets or force-moves a branch; pulls are fast-forward only,
//! so unpushed commits are never discarded.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;

use reposync_core::{config, Outcome, RepositoryDescriptor, StashRecord};

use crate::error::SyncError;
use crate::git::{GitOps, GitOutput};
use crate::hook::{HookExecutor, HookStatus};
use crate::logger::RepoLogger;

/// Bound on the connectivity probe and the other remote lookups.
pub const REMOTE_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on a single pull attempt.
pub const PULL_TIMEOUT: Duration = Duration::from_secs(60);

const DRY_RUN_MARKER: &str = "[DRY-RUN]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Validating,
    Protecting,
    Syncing,
    Hook,
    Restoring,
    Done,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Validating => "VALIDATING",
            State::Protecting => "PROTECTING",
            State::Syncing => "SYNCING",
            State::Hook => "HOOK",
            State::Restoring => "RESTORING",
            State::Done => "DONE",
        })
    }
}

#[derive(Debug, Clone)]
pub struct MachineOptions {
    pub remote: String,
    /// Candidate default branches, tried in order when the remote does not
    /// advertise one.
    pub default_branches: Vec<String>,
    pub dry_run: bool,
    pub probe_timeout: Duration,
    pub pull_timeout: Duration,
}

impl MachineOptions {
    pub fn new(remote: impl Into<String>, default_branches: Vec<String>, dry_run: bool) -> Self {
        Self {
            remote: remote.into(),
            default_branches,
            dry_run,
            probe_timeout: REMOTE_PROBE_TIMEOUT,
            pull_timeout: PULL_TIMEOUT,
        }
    }
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self::new(
            config::DEFAULT_REMOTE,
            config::DEFAULT_BRANCH_CANDIDATES
                .iter()
                .map(|b| b.to_string())
                .collect(),
            false,
        )
    }
}

/// `Err` carries the terminal outcome of an early exit.
type Step<T> = Result<T, Outcome>;

/// Drives one repository to a terminal [`Outcome`].
pub struct RepoStateMachine {
    git: Arc<dyn GitOps>,
    hooks: Arc<dyn HookExecutor>,
    options: MachineOptions,
}

impl RepoStateMachine {
    pub fn new(git: Arc<dyn GitOps>, hooks: Arc<dyn HookExecutor>, options: MachineOptions) -> Self {
        Self {
            git,
            hooks,
            options,
        }
    }

    pub fn options(&self) -> &MachineOptions {
        &self.options
    }

    /// Process `repo` start to finish. Never panics on git failures; every
    /// error becomes either an outcome or a logged warning.
    pub async fn run(&self, repo: &RepositoryDescriptor, log: &RepoLogger) -> Outcome {
        let outcome = match self.drive(repo, log).await {
            Ok(()) => Outcome::Success,
            Err(outcome) => outcome,
        };
        self.enter(log, State::Done).await;
        match outcome {
            Outcome::Success => log.success("repository synchronized").await,
            Outcome::Skipped => log.info("skipped").await,
            other => log.error(format!("finished with {other}")).await,
        }
        outcome
    }

    async fn drive(&self, repo: &RepositoryDescriptor, log: &RepoLogger) -> Step<()> {
        self.enter(log, State::Validating).await;
        let original = self.validate(repo, log).await?;

        self.enter(log, State::Protecting).await;
        let stash = self.protect(repo, log).await?;

        self.enter(log, State::Syncing).await;
        let switched_to = self.sync(repo, &original, stash.as_ref(), log).await?;

        self.enter(log, State::Hook).await;
        self.hook(repo, log).await;

        self.enter(log, State::Restoring).await;
        self.restore(repo, &original, switched_to.as_deref(), stash.as_ref(), log)
            .await;
        Ok(())
    }

    async fn enter(&self, log: &RepoLogger, state: State) {
        log.debug(format!("state -> {state}")).await;
    }

    // -----------------------------------------------------------------------
    // VALIDATING
    // -----------------------------------------------------------------------

    async fn validate(&self, repo: &RepositoryDescriptor, log: &RepoLogger) -> Step<String> {
        if !repo.path.is_dir() {
            log.error(format!("cannot enter directory {}", repo.path.display()))
                .await;
            return Err(Outcome::Failed);
        }
        if !self.git.is_repo(&repo.path).await {
            log.info("not a git repository").await;
            return Err(Outcome::Skipped);
        }
        match self.git.current_branch(&repo.path).await {
            Ok(Some(branch)) => {
                log.info(format!("on branch {branch}")).await;
                Ok(branch)
            }
            Ok(None) => {
                log.warn("detached HEAD; leaving repository untouched").await;
                Err(Outcome::Skipped)
            }
            Err(err) => {
                log.error(format!("cannot determine current branch: {err}")).await;
                Err(Outcome::Failed)
            }
        }
    }

    // -----------------------------------------------------------------------
    // PROTECTING
    // -----------------------------------------------------------------------

    async fn protect(
        &self,
        repo: &RepositoryDescriptor,
        log: &RepoLogger,
    ) -> Step<Option<StashRecord>> {
        let dir = &repo.path;
        let changes = match self.git.status_porcelain(dir).await {
            Ok(changes) => changes,
            Err(err) => {
                log.error(format!("cannot read working tree status: {err}")).await;
                return Err(Outcome::Failed);
            }
        };
        self.report_unpushed(dir, log).await;

        if changes.is_empty() {
            log.debug("working tree clean").await;
            return Ok(None);
        }
        log.info(format!("{} uncommitted change(s); stashing", changes.len()))
            .await;

        let stash = StashRecord::for_repo(&repo.name, Local::now());
        let command = format!("git stash push --include-untracked -m {}", stash.label);
        if !self.announce(log, &command).await {
            self.report(log, format!("local changes saved as stash@{{0}} ({})", stash.label))
                .await;
            return Ok(Some(stash));
        }

        let pushed = self.git.stash_push(dir, &stash.label, true).await;
        if let Ok(out) = &pushed {
            log.output("stash", &out.text);
        }
        if !succeeded(&pushed) {
            log.error(format!(
                "could not stash local changes ({}); not touching branches",
                failure_detail(&pushed)
            ))
            .await;
            return Err(Outcome::Failed);
        }

        match self.find_stash(dir, &stash).await {
            Some(reference) => {
                self.report(log, format!("local changes saved as {reference} ({})", stash.label))
                    .await;
                Ok(Some(stash))
            }
            None => {
                log.error(format!(
                    "stash {} not found after push; local changes may be unprotected",
                    stash.label
                ))
                .await;
                Err(Outcome::Failed)
            }
        }
    }

    async fn report_unpushed(&self, dir: &Path, log: &RepoLogger) {
        match self.git.rev_list_count(dir, "@{u}..HEAD").await {
            Ok(0) => log.debug("no unpushed commits").await,
            Ok(n) => {
                log.info(format!(
                    "{n} unpushed commit(s) on this branch; they are kept as-is"
                ))
                .await
            }
            Err(_) => log.debug("no upstream configured").await,
        }
    }

    // -----------------------------------------------------------------------
    // SYNCING
    // -----------------------------------------------------------------------

    /// Returns the branch switched to, if any.
    async fn sync(
        &self,
        repo: &RepositoryDescriptor,
        original: &str,
        stash: Option<&StashRecord>,
        log: &RepoLogger,
    ) -> Step<Option<String>> {
        let dir = &repo.path;
        let remote = self.options.remote.as_str();
        let reachable = self.probe_remote(dir, log).await;

        let Some(default) = self.resolve_default_branch(dir, reachable, log).await else {
            log.info(format!(
                "no default branch found; staying on {original} without syncing"
            ))
            .await;
            return Ok(None);
        };

        let mut switched_to = None;
        if default == original {
            log.debug(format!("already on default branch {default}")).await;
        } else {
            if self.announce(log, &format!("git checkout {default}")).await {
                let checkout = self.git.checkout(dir, &default).await;
                if let Ok(out) = &checkout {
                    log.output("checkout", &out.text);
                }
                if !succeeded(&checkout) {
                    log.error(format!(
                        "checkout of {default} failed ({})",
                        failure_detail(&checkout)
                    ))
                    .await;
                    self.pop_stash(dir, stash, log).await;
                    return Err(Outcome::Failed);
                }
            }
            self.report(log, format!("switched from {original} to {default}"))
                .await;
            switched_to = Some(default.clone());
        }

        if !reachable {
            log.warn(format!("remote {remote} unreachable; skipping pull"))
                .await;
            return Ok(switched_to);
        }

        let command = format!("git pull --ff-only {remote} {default}");
        if self.announce(log, &command).await {
            let pulled = self
                .git
                .pull(dir, remote, &default, self.options.pull_timeout)
                .await;
            if let Ok(out) = &pulled {
                log.output("pull", &out.text);
            }
            if succeeded(&pulled) {
                log.info(format!("{default} is up to date with {remote}"))
                    .await;
            } else {
                log.warn(format!(
                    "pull failed ({}); continuing with local state of {default}",
                    failure_detail(&pulled)
                ))
                .await;
            }
        } else {
            self.report(log, format!("{default} is up to date with {remote}"))
                .await;
        }
        Ok(switched_to)
    }

    async fn probe_remote(&self, dir: &Path, log: &RepoLogger) -> bool {
        let remote = self.options.remote.as_str();
        if !self.git.remote_exists(dir, remote).await {
            log.debug(format!("no remote named {remote}")).await;
            return false;
        }
        let reachable = self
            .git
            .remote_reachable(dir, remote, self.options.probe_timeout)
            .await;
        if reachable {
            log.debug(format!("remote {remote} reachable")).await;
        }
        reachable
    }

    /// Priority: remote HEAD symref, cached remote HEAD, `remote show`,
    /// then the configured candidates that exist on the remote.
    async fn resolve_default_branch(
        &self,
        dir: &Path,
        reachable: bool,
        log: &RepoLogger,
    ) -> Option<String> {
        let remote = self.options.remote.as_str();
        let timeout = self.options.probe_timeout;

        let mut found = None;
        if reachable {
            found = self
                .git
                .symbolic_default_branch(dir, remote, timeout)
                .await
                .map(|b| (b, "remote HEAD"));
        }
        if found.is_none() {
            found = self
                .git
                .cached_default_branch(dir, remote)
                .await
                .map(|b| (b, "cached remote HEAD"));
        }
        if found.is_none() && reachable {
            found = self
                .git
                .remote_show_default_branch(dir, remote, timeout)
                .await
                .map(|b| (b, "remote show"));
        }
        if found.is_none() && reachable {
            found = self.first_candidate_on_remote(dir).await;
        }

        if let Some((branch, source)) = &found {
            log.debug(format!("default branch {branch} (from {source})")).await;
        }
        found.map(|(branch, _)| branch)
    }

    async fn first_candidate_on_remote(&self, dir: &Path) -> Option<(String, &'static str)> {
        for candidate in &self.options.default_branches {
            if self
                .git
                .branch_exists_on_remote(
                    dir,
                    &self.options.remote,
                    candidate,
                    self.options.probe_timeout,
                )
                .await
            {
                return Some((candidate.clone(), "candidate list"));
            }
        }
        None
    }

    // -----------------------------------------------------------------------
    // HOOK
    // -----------------------------------------------------------------------

    async fn hook(&self, repo: &RepositoryDescriptor, log: &RepoLogger) {
        match self.hooks.run_hook(repo, log, self.options.dry_run).await {
            Ok(HookStatus::NotConfigured) => log.debug("no hook configured").await,
            Ok(HookStatus::Simulated) => {}
            Ok(HookStatus::Succeeded) => log.info("hook completed").await,
            Ok(HookStatus::Failed { code }) => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                log.warn(format!("hook failed (exit {code}); continuing")).await
            }
            Ok(HookStatus::TimedOut) => log.warn("hook timed out and was killed; continuing").await,
            Err(err) => log.warn(format!("hook could not run: {err}")).await,
        }
    }

    // -----------------------------------------------------------------------
    // RESTORING
    // -----------------------------------------------------------------------

    async fn restore(
        &self,
        repo: &RepositoryDescriptor,
        original: &str,
        switched_to: Option<&str>,
        stash: Option<&StashRecord>,
        log: &RepoLogger,
    ) {
        let dir = &repo.path;
        if let Some(current) = switched_to {
            if self.announce(log, &format!("git checkout {original}")).await {
                let checkout = self.git.checkout(dir, original).await;
                if let Ok(out) = &checkout {
                    log.output("checkout", &out.text);
                }
                if !succeeded(&checkout) {
                    log.warn(format!(
                        "could not switch back from {current} to {original} ({}). \
                         Run `git -C {} checkout {original}` manually",
                        failure_detail(&checkout),
                        dir.display()
                    ))
                    .await;
                    if let Some(stash) = stash {
                        // Popping here would land the changes on the wrong branch.
                        log.warn(format!(
                            "local changes left in stash {}; after switching back run \
                             `git -C {} stash list` and `git stash pop` the matching entry",
                            stash.label,
                            dir.display()
                        ))
                        .await;
                    }
                    return;
                }
            }
            self.report(log, format!("switched back to {original}")).await;
        }

        self.pop_stash(dir, stash, log).await;
    }

    /// Best-effort re-apply of `stash`; a failure leaves it in the stash list
    /// and prints how to recover it.
    async fn pop_stash(&self, dir: &Path, stash: Option<&StashRecord>, log: &RepoLogger) -> bool {
        let Some(stash) = stash else {
            return true;
        };

        let reference = if self.options.dry_run {
            "stash@{0}".to_string()
        } else {
            match self.find_stash(dir, stash).await {
                Some(reference) => reference,
                None => {
                    log.warn(format!(
                        "stash {} not found; check `git -C {} stash list`",
                        stash.label,
                        dir.display()
                    ))
                    .await;
                    return false;
                }
            }
        };

        if !self
            .announce(log, &format!("git stash pop --index {reference}"))
            .await
        {
            self.report(log, "local changes restored").await;
            return true;
        }
        let mut popped = self.git.stash_pop(dir, &reference, true).await;
        if let Ok(out) = &popped {
            log.output("stash", &out.text);
        }
        if index_conflict(&popped) {
            // Nothing was applied; the stash is still in place.
            log.warn("staged changes cannot be restored as staged; re-applying them unstaged")
                .await;
            self.announce(log, &format!("git stash pop {reference}")).await;
            popped = self.git.stash_pop(dir, &reference, false).await;
            if let Ok(out) = &popped {
                log.output("stash", &out.text);
            }
        }
        if succeeded(&popped) {
            self.report(log, "local changes restored").await;
            return true;
        }

        log.warn(format!(
            "could not re-apply stash {} ({}). Your changes are safe in the stash; \
             recover with `git -C {} stash list` and `git stash pop <entry>`",
            stash.label,
            failure_detail(&popped),
            dir.display()
        ))
        .await;
        false
    }

    async fn find_stash(&self, dir: &Path, stash: &StashRecord) -> Option<String> {
        let entries = self.git.stash_list(dir).await.ok()?;
        entries
            .into_iter()
            .find(|e| e.subject.ends_with(&stash.label))
            .map(|e| e.reference)
    }

    /// Log the effect of a mutation. In dry-run the effect is simulated and
    /// the line is marked as such.
    async fn report(&self, log: &RepoLogger, message: impl AsRef<str>) {
        if self.options.dry_run {
            log.info(format!("{DRY_RUN_MARKER} {}", message.as_ref())).await;
        } else {
            log.info(message).await;
        }
    }

    /// Log a mutating command. Returns `false` in dry-run, meaning the
    /// caller must not execute it.
    async fn announce(&self, log: &RepoLogger, command: &str) -> bool {
        if self.options.dry_run {
            log.info(format!("{DRY_RUN_MARKER} would run: {command}")).await;
            false
        } else {
            log.info(format!("running: {command}")).await;
            true
        }
    }
}

fn succeeded(result: &Result<GitOutput, SyncError>) -> bool {
    matches!(result, Ok(out) if out.success)
}

/// `git stash pop --index` refused because the staged part does not apply.
fn index_conflict(result: &Result<GitOutput, SyncError>) -> bool {
    matches!(result, Ok(out) if !out.success && out.text.to_lowercase().contains("without --index"))
}

fn failure_detail(result: &Result<GitOutput, SyncError>) -> String {
    match result {
        Ok(out) => out
            .text
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("non-zero exit")
            .trim()
            .to_string(),
        Err(err) => err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
