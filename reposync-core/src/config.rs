//! Layered run settings.
//!
//! Precedence, highest first: CLI [`Overrides`] → `REPOSYNC_*` environment
//! variables → YAML config file → built-in defaults.
//!
//! # API pattern
//!
//! - `load_at(home, overrides, env)`: explicit home and environment; used in tests
//! - `load(overrides)`: derives both from the process, delegates to `load_at`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{io_err, ConfigError};
use crate::paths;

pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_REMOTE: &str = "origin";
pub const DEFAULT_BRANCH_CANDIDATES: [&str; 3] = ["main", "master", "develop"];

pub const ENV_ROOT: &str = "REPOSYNC_ROOT";
pub const ENV_SKIP: &str = "REPOSYNC_SKIP";
pub const ENV_DEFAULT_BRANCHES: &str = "REPOSYNC_DEFAULT_BRANCHES";
pub const ENV_VERBOSE: &str = "REPOSYNC_VERBOSE";
pub const ENV_DRY_RUN: &str = "REPOSYNC_DRY_RUN";
pub const ENV_BATCH: &str = "REPOSYNC_BATCH";
pub const ENV_TIMEOUT: &str = "REPOSYNC_TIMEOUT";
pub const ENV_REMOTE: &str = "REPOSYNC_REMOTE";
pub const ENV_CONFIG: &str = "REPOSYNC_CONFIG";
pub const ENV_LOG_FILE: &str = "REPOSYNC_LOG_FILE";

/// Snapshot of the environment variables the loader consults.
pub type EnvVars = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// How a per-repository hook is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookCommand {
    /// Program + arguments, spawned directly without a shell.
    Exec { program: String, args: Vec<String> },
    /// Explicit opt-in: the string is handed to `sh -c`.
    Shell(String),
}

impl HookCommand {
    /// Human-readable rendering for logs and dry-run output.
    pub fn display(&self) -> String {
        match self {
            HookCommand::Exec { program, args } if args.is_empty() => program.clone(),
            HookCommand::Exec { program, args } => format!("{program} {}", args.join(" ")),
            HookCommand::Shell(script) => format!("sh -c '{script}'"),
        }
    }
}

/// A validated hook: what to run and how long it may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSpec {
    pub command: HookCommand,
    pub timeout: Duration,
}

/// Hook entry as written in the YAML file, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookDef {
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl HookDef {
    pub fn validate(self, repo: &str) -> Result<HookSpec, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidHook {
            repo: repo.to_string(),
            reason: reason.to_string(),
        };

        let command = match (self.command, self.shell) {
            (Some(_), Some(_)) => return Err(invalid("set either `command` or `shell`, not both")),
            (None, None) => return Err(invalid("one of `command` or `shell` is required")),
            (Some(argv), None) => {
                let mut argv = argv.into_iter();
                let program = argv.next().unwrap_or_default();
                if program.trim().is_empty() {
                    return Err(invalid("`command` must start with a program name"));
                }
                HookCommand::Exec {
                    program,
                    args: argv.collect(),
                }
            }
            (None, Some(script)) => {
                if script.trim().is_empty() {
                    return Err(invalid("`shell` must not be empty"));
                }
                HookCommand::Shell(script)
            }
        };

        let timeout_secs = self.timeout_secs.unwrap_or(DEFAULT_HOOK_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(invalid("`timeout_secs` must be at least 1"));
        }

        Ok(HookSpec {
            command,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

// ---------------------------------------------------------------------------
// Config file
// ---------------------------------------------------------------------------

/// On-disk `config.yaml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub skip: Option<Vec<String>>,
    #[serde(default)]
    pub default_branches: Option<Vec<String>>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub hooks: BTreeMap<String, HookDef>,
}

impl ConfigFile {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Values supplied on the command line. `None` / `false` defer to lower layers.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub root: Option<PathBuf>,
    pub verbose: bool,
    pub dry_run: bool,
    pub batch_size: Option<usize>,
    pub job_timeout_secs: Option<u64>,
    pub config_path: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub skip: Vec<String>,
    pub default_branches: Vec<String>,
    pub remote: String,
    pub verbose: bool,
    pub dry_run: bool,
    pub batch_size: usize,
    pub job_timeout: Duration,
    pub log_file: PathBuf,
    pub hooks: BTreeMap<String, HookSpec>,
}

impl Settings {
    /// Resolve settings against an explicit home directory and environment.
    pub fn load_at(home: &Path, overrides: &Overrides, env: &EnvVars) -> Result<Self, ConfigError> {
        let file = load_config_file(home, overrides, env)?;
        let var = |key: &str| env.get(key).map(String::as_str).filter(|v| !v.trim().is_empty());

        let root = overrides
            .root
            .clone()
            .or_else(|| var(ENV_ROOT).map(PathBuf::from))
            .or(file.root)
            .map(|p| paths::expand_home(&p, home))
            .unwrap_or_else(|| paths::default_root(home));

        let skip = var(ENV_SKIP)
            .map(split_words)
            .or(file.skip)
            .unwrap_or_default();

        let default_branches = var(ENV_DEFAULT_BRANCHES)
            .map(split_words)
            .or(file.default_branches)
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_BRANCH_CANDIDATES.iter().map(|s| s.to_string()).collect());

        let remote = var(ENV_REMOTE)
            .map(str::to_string)
            .or(file.remote)
            .unwrap_or_else(|| DEFAULT_REMOTE.to_string());

        let verbose = overrides.verbose || var(ENV_VERBOSE).map(is_truthy).unwrap_or(false);
        let dry_run = overrides.dry_run || var(ENV_DRY_RUN).map(is_truthy).unwrap_or(false);

        let batch_size = match overrides.batch_size {
            Some(n) => n,
            None => match var(ENV_BATCH) {
                Some(raw) => parse_positive(ENV_BATCH, raw)? as usize,
                None => file.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            },
        };
        if batch_size == 0 {
            return Err(ConfigError::InvalidSetting {
                setting: "batch size",
                value: batch_size.to_string(),
                reason: "must be at least 1",
            });
        }

        let timeout_secs = match overrides.job_timeout_secs {
            Some(n) => n,
            None => match var(ENV_TIMEOUT) {
                Some(raw) => parse_positive(ENV_TIMEOUT, raw)?,
                None => file.job_timeout_secs.unwrap_or(DEFAULT_JOB_TIMEOUT_SECS),
            },
        };
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                setting: "job timeout",
                value: timeout_secs.to_string(),
                reason: "must be at least 1 second",
            });
        }

        let log_file = overrides
            .log_file
            .clone()
            .or_else(|| var(ENV_LOG_FILE).map(PathBuf::from))
            .map(|p| paths::expand_home(&p, home))
            .unwrap_or_else(|| paths::default_log_path(home));

        let hooks = file
            .hooks
            .into_iter()
            .map(|(repo, def)| def.validate(&repo).map(|spec| (repo, spec)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(Self {
            root,
            skip,
            default_branches,
            remote,
            verbose,
            dry_run,
            batch_size,
            job_timeout: Duration::from_secs(timeout_secs),
            log_file,
            hooks,
        })
    }

    /// `load_at` convenience wrapper using the process environment and `dirs::home_dir()`.
    pub fn load(overrides: &Overrides) -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        let env: EnvVars = std::env::vars().collect();
        Self::load_at(&home, overrides, &env)
    }
}

fn load_config_file(
    home: &Path,
    overrides: &Overrides,
    env: &EnvVars,
) -> Result<ConfigFile, ConfigError> {
    let explicit = overrides
        .config_path
        .clone()
        .or_else(|| env.get(ENV_CONFIG).filter(|v| !v.is_empty()).map(PathBuf::from))
        .map(|p| paths::expand_home(&p, home));

    match explicit {
        Some(path) if !path.exists() => Err(ConfigError::ConfigNotFound { path }),
        Some(path) => ConfigFile::from_path(&path),
        None => {
            let path = paths::default_config_path(home);
            if path.exists() {
                ConfigFile::from_path(&path)
            } else {
                Ok(ConfigFile::default())
            }
        }
    }
}

fn split_words(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_positive(setting: &'static str, raw: &str) -> Result<u64, ConfigError> {
    let invalid = |reason| ConfigError::InvalidSetting {
        setting,
        value: raw.to_string(),
        reason,
    };
    let n: u64 = raw.trim().parse().map_err(|_| invalid("not a number"))?;
    if n == 0 {
        return Err(invalid("must be at least 1"));
    }
    Ok(n)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
