//! Config-file loading and error-message integration tests.

use std::collections::BTreeMap;
use std::time::Duration;

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use predicates::Predicate;
use reposync_core::{
    config::{EnvVars, ENV_CONFIG},
    discovery, ConfigError, HookCommand, Overrides, Settings,
};

fn no_env() -> EnvVars {
    BTreeMap::new()
}

// ---------------------------------------------------------------------------
// 1. File loading
// ---------------------------------------------------------------------------

#[test]
fn full_config_file_is_applied() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let config = home.child(".reposync/config.yaml");
    config
        .write_str(
            r#"
root: ~/work
skip: [archive]
default_branches: [trunk, main]
batch_size: 4
job_timeout_secs: 45
remote: upstream
hooks:
  website:
    command: [npm, run, build]
    timeout_secs: 120
  legacy:
    shell: "make -C docs all"
"#,
        )
        .expect("write");

    let settings = Settings::load_at(home.path(), &Overrides::default(), &no_env()).expect("load");
    assert_eq!(settings.root, home.path().join("work"));
    assert_eq!(settings.skip, vec!["archive"]);
    assert_eq!(settings.default_branches, vec!["trunk", "main"]);
    assert_eq!(settings.batch_size, 4);
    assert_eq!(settings.job_timeout, Duration::from_secs(45));
    assert_eq!(settings.remote, "upstream");

    let website = &settings.hooks["website"];
    assert_eq!(website.timeout, Duration::from_secs(120));
    assert_eq!(website.command.display(), "npm run build");
    assert_eq!(
        settings.hooks["legacy"].command,
        HookCommand::Shell("make -C docs all".to_string())
    );
}

#[test]
fn empty_config_file_means_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".reposync/config.yaml").write_str("").expect("write");
    let settings = Settings::load_at(home.path(), &Overrides::default(), &no_env()).expect("load");
    assert_eq!(settings.batch_size, 3);
}

// ---------------------------------------------------------------------------
// 2. Error messages
// ---------------------------------------------------------------------------

#[test]
fn unknown_key_reports_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".reposync/config.yaml")
        .write_str("batchsize: 4\n")
        .expect("write");

    let err = Settings::load_at(home.path(), &Overrides::default(), &no_env()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(predicate::str::contains("config.yaml").eval(&err.to_string()));
}

#[test]
fn explicit_missing_config_is_an_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let overrides = Overrides {
        config_path: Some(home.path().join("elsewhere.yaml")),
        ..Overrides::default()
    };
    let err = Settings::load_at(home.path(), &overrides, &no_env()).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("elsewhere.yaml"));
}

#[test]
fn config_path_from_env_is_used() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let custom = home.child("custom.yaml");
    custom.write_str("remote: mirror\n").expect("write");

    let mut env = no_env();
    env.insert(ENV_CONFIG.to_string(), custom.path().display().to_string());
    let settings = Settings::load_at(home.path(), &Overrides::default(), &env).expect("load");
    assert_eq!(settings.remote, "mirror");
}

#[test]
fn invalid_hook_names_the_repository() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".reposync/config.yaml")
        .write_str("hooks:\n  broken:\n    timeout_secs: 3\n")
        .expect("write");

    let err = Settings::load_at(home.path(), &Overrides::default(), &no_env()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidHook { .. }), "got: {err}");
    assert!(err.to_string().contains("'broken'"));
}

// ---------------------------------------------------------------------------
// 3. Discovery against resolved settings
// ---------------------------------------------------------------------------

#[test]
fn discovery_uses_resolved_root_and_skip_list() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child("git/repoA").create_dir_all().expect("mkdir");
    home.child("git/repoB").create_dir_all().expect("mkdir");
    home.child("git/old").create_dir_all().expect("mkdir");

    let mut env = no_env();
    env.insert("REPOSYNC_SKIP".to_string(), "old".to_string());
    let settings = Settings::load_at(home.path(), &Overrides::default(), &env).expect("load");

    let repos = discovery::discover(&settings.root, &settings.skip).expect("discover");
    let names: Vec<String> = repos.iter().map(|r| r.name.to_string()).collect();
    assert_eq!(names, vec!["repoA", "repoB"]);
}
