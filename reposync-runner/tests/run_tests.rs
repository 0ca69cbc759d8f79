//! Whole-run tests through `reposync_runner::run` against temp directories.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

use reposync_core::{config::EnvVars, ConfigError, Outcome, Overrides, Settings};
use reposync_runner::{run, RunnerError};

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn settings(home: &Path, dry_run: bool) -> Settings {
    let overrides = Overrides {
        dry_run,
        ..Overrides::default()
    };
    let env: EnvVars = BTreeMap::new();
    Settings::load_at(home, &overrides, &env).expect("settings")
}

#[tokio::test]
async fn empty_root_is_a_successful_run() {
    if !git_available() {
        return;
    }
    let home = TempDir::new().unwrap();
    std::fs::create_dir_all(home.path().join("git")).unwrap();

    let summary = run(settings(home.path(), false), home.path().to_path_buf())
        .await
        .expect("run");
    assert_eq!(summary.total, 0);
    assert_eq!(summary.exit_code(), 0);
}

#[tokio::test]
async fn missing_root_is_a_setup_error() {
    if !git_available() {
        return;
    }
    let home = TempDir::new().unwrap();

    let err = run(settings(home.path(), false), home.path().to_path_buf())
        .await
        .unwrap_err();
    assert!(
        matches!(err, RunnerError::Config(ConfigError::RootNotFound { .. })),
        "got: {err}"
    );
}

#[tokio::test]
async fn plain_directories_are_skipped_and_logged() {
    if !git_available() {
        return;
    }
    let home = TempDir::new().unwrap();
    for name in ["alpha", "beta", "gamma", "delta"] {
        std::fs::create_dir_all(home.path().join("git").join(name)).unwrap();
    }

    let settings = settings(home.path(), true);
    let log_file = settings.log_file.clone();
    let summary = run(settings, home.path().to_path_buf()).await.expect("run");

    assert_eq!(summary.total, 4);
    assert_eq!(summary.skipped, 4);
    assert!(summary.results.iter().all(|r| r.outcome == Outcome::Skipped));
    assert_eq!(summary.exit_code(), 0);

    let log = std::fs::read_to_string(log_file).expect("run log");
    assert!(log.contains("[reposync] [INFO] [DRY-RUN]"));
    assert!(log.contains("[gamma] [INFO] not a git repository"));
    assert!(log.contains("Total: 4 | Success: 0 | Failed: 0 | Skipped: 4 | Timeout: 0 | Unknown: 0"));

    // Per-run scratch space is cleaned up.
    let run_root = home.path().join(".reposync").join("run");
    let leftovers = std::fs::read_dir(&run_root).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
}
