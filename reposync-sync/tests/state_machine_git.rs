//! End-to-end state machine runs against real git repositories.
//!
//! Each test builds a bare "remote" plus clones under a temp directory.
//! Tests return early when no `git` binary is available.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use reposync_core::{Outcome, RepositoryDescriptor};
use reposync_sync::{GitCli, MachineOptions, NoHooks, RepoStateMachine, SynchronizedLogger};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn git_available() -> bool {
    init_logging();
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

struct World {
    tmp: TempDir,
    remote: PathBuf,
}

impl World {
    /// Bare remote whose `main` has one commit.
    fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let remote = tmp.path().join("remote.git");
        git(tmp.path(), &["init", "--bare", "remote.git"]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        let world = Self { tmp, remote };
        let seed = world.clone_into("seed");
        std::fs::write(seed.join("x.txt"), "one\n").expect("write");
        git(&seed, &["add", "."]);
        git(&seed, &["commit", "-m", "initial"]);
        git(&seed, &["push", "origin", "HEAD:main"]);
        world
    }

    fn clone_into(&self, name: &str) -> PathBuf {
        let root = self.tmp.path().join("root");
        std::fs::create_dir_all(&root).expect("mkdir root");
        git(
            &root,
            &["clone", "--quiet", self.remote.to_str().expect("utf8"), name],
        );
        let dir = root.join(name);
        git(&dir, &["config", "user.name", "Test"]);
        git(&dir, &["config", "user.email", "test@example.com"]);
        git(&dir, &["config", "commit.gpgsign", "false"]);
        dir
    }

    /// Push a new commit to the remote's `main` from the seed clone.
    fn advance_remote(&self) -> String {
        let seed = self.tmp.path().join("root").join("seed");
        std::fs::write(seed.join("y.txt"), "upstream\n").expect("write");
        git(&seed, &["add", "."]);
        git(&seed, &["commit", "-m", "upstream change"]);
        git(&seed, &["push", "origin", "HEAD:main"]);
        git(&seed, &["rev-parse", "HEAD"])
    }

    fn job_log(&self, name: &str) -> PathBuf {
        self.tmp.path().join("jobs").join(format!("{name}.log"))
    }
}

async fn run(world: &World, path: &Path, dry_run: bool) -> Outcome {
    let repo = RepositoryDescriptor::from_path(path).expect("descriptor");
    let options = MachineOptions {
        dry_run,
        ..MachineOptions::default()
    };
    let machine = RepoStateMachine::new(Arc::new(GitCli::default()), Arc::new(NoHooks), options);
    let job_log = world.job_log(repo.name.as_str());
    let log = Arc::new(SynchronizedLogger::console_only(true).without_console())
        .for_job(&repo.name, Some(job_log.as_path()))
        .expect("logger");
    machine.run(&repo, &log).await
}

#[tokio::test]
async fn clean_repository_on_main_is_fast_forwarded() {
    if !git_available() {
        return;
    }
    let world = World::new();
    let repo = world.clone_into("repoA");
    let upstream = world.advance_remote();

    assert_eq!(run(&world, &repo, false).await, Outcome::Success);
    assert_eq!(git(&repo, &["rev-parse", "--abbrev-ref", "HEAD"]), "main");
    assert_eq!(git(&repo, &["rev-parse", "HEAD"]), upstream);
}

#[tokio::test]
async fn dirty_feature_branch_is_restored_exactly() {
    if !git_available() {
        return;
    }
    let world = World::new();
    let repo = world.clone_into("repoB");
    git(&repo, &["checkout", "-q", "-b", "feature"]);
    std::fs::write(repo.join("x.txt"), "local edit\n").expect("write");
    std::fs::write(repo.join("scratch.txt"), "untracked\n").expect("write");
    let upstream = world.advance_remote();

    assert_eq!(run(&world, &repo, false).await, Outcome::Success);

    assert_eq!(git(&repo, &["rev-parse", "--abbrev-ref", "HEAD"]), "feature");
    assert_eq!(
        std::fs::read_to_string(repo.join("x.txt")).expect("read"),
        "local edit\n"
    );
    assert_eq!(
        std::fs::read_to_string(repo.join("scratch.txt")).expect("read"),
        "untracked\n"
    );
    assert_eq!(git(&repo, &["stash", "list"]), "");
    assert_eq!(git(&repo, &["rev-parse", "main"]), upstream);
}

#[tokio::test]
async fn plain_directory_is_skipped() {
    if !git_available() {
        return;
    }
    let world = World::new();
    let plain = world.tmp.path().join("root").join("repoC");
    std::fs::create_dir_all(&plain).expect("mkdir");

    assert_eq!(run(&world, &plain, false).await, Outcome::Skipped);
}

#[tokio::test]
async fn directory_with_broken_git_dir_is_skipped() {
    if !git_available() {
        return;
    }
    let world = World::new();
    let half = world.tmp.path().join("root").join("half");
    std::fs::create_dir_all(half.join(".git")).expect("mkdir");

    assert_eq!(run(&world, &half, false).await, Outcome::Skipped);
}

#[tokio::test]
async fn broken_git_dir_inside_another_clone_is_skipped() {
    if !git_available() {
        return;
    }
    let world = World::new();
    let outer = world.clone_into("outer");
    let inner = outer.join("vendored");
    std::fs::create_dir_all(inner.join(".git")).expect("mkdir");
    let head_before = git(&outer, &["rev-parse", "HEAD"]);

    assert_eq!(run(&world, &inner, false).await, Outcome::Skipped);
    assert_eq!(git(&outer, &["rev-parse", "HEAD"]), head_before);
    assert_eq!(git(&outer, &["stash", "list"]), "");
}

#[tokio::test]
async fn staged_changes_come_back_staged() {
    if !git_available() {
        return;
    }
    let world = World::new();
    let repo = world.clone_into("repoF");
    git(&repo, &["checkout", "-q", "-b", "feature"]);
    std::fs::write(repo.join("x.txt"), "staged edit\n").expect("write");
    git(&repo, &["add", "x.txt"]);
    std::fs::write(repo.join("notes.txt"), "untracked\n").expect("write");
    let status_before = git(&repo, &["status", "--porcelain"]);
    let upstream = world.advance_remote();

    assert_eq!(run(&world, &repo, false).await, Outcome::Success);

    assert_eq!(git(&repo, &["rev-parse", "--abbrev-ref", "HEAD"]), "feature");
    assert_eq!(git(&repo, &["status", "--porcelain"]), status_before);
    assert_eq!(git(&repo, &["stash", "list"]), "");
    assert_eq!(git(&repo, &["rev-parse", "main"]), upstream);
}

#[tokio::test]
async fn unpushed_commits_survive_a_sync() {
    if !git_available() {
        return;
    }
    let world = World::new();
    let repo = world.clone_into("repoD");
    git(&repo, &["checkout", "-q", "-b", "work"]);
    std::fs::write(repo.join("z.txt"), "mine\n").expect("write");
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "local only"]);
    let local_head = git(&repo, &["rev-parse", "HEAD"]);
    world.advance_remote();

    assert_eq!(run(&world, &repo, false).await, Outcome::Success);
    assert_eq!(git(&repo, &["rev-parse", "--abbrev-ref", "HEAD"]), "work");
    assert_eq!(git(&repo, &["rev-parse", "HEAD"]), local_head);
}

#[tokio::test]
async fn dry_run_leaves_everything_untouched() {
    if !git_available() {
        return;
    }
    let world = World::new();
    let repo = world.clone_into("repoE");
    git(&repo, &["checkout", "-q", "-b", "feature"]);
    std::fs::write(repo.join("x.txt"), "local edit\n").expect("write");
    let main_before = git(&repo, &["rev-parse", "main"]);
    world.advance_remote();

    assert_eq!(run(&world, &repo, true).await, Outcome::Success);

    assert_eq!(git(&repo, &["rev-parse", "--abbrev-ref", "HEAD"]), "feature");
    assert_eq!(git(&repo, &["stash", "list"]), "");
    assert_eq!(git(&repo, &["rev-parse", "main"]), main_before);
    assert_eq!(
        git(&repo, &["status", "--porcelain"]),
        "M x.txt",
        "working tree changes stay unstashed"
    );

    let log = std::fs::read_to_string(world.job_log("repoE")).expect("job log");
    assert!(log.contains("[DRY-RUN] would run: git checkout main"));
    assert!(!log.contains("running: "));
}
