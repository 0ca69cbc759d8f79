//! reposync: bring every git repository under a root directory up to date
//! with its remote's default branch, without losing local work.
//!
//! # Usage
//!
//! ```text
//! reposync [-v] [-n] [-d <root>] [-b <batch>] [-t <secs>] [-c <config>]
//!          [--log-file <path>] [--summary-json <path>]
//! ```
//!
//! Exits 0 when every repository ended SUCCESS or SKIPPED, 1 otherwise
//! (including setup errors).

mod report;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use reposync_core::{config::EnvVars, Overrides, Settings};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "reposync",
    version,
    about = "Sync every git repository under a directory to its default branch",
    long_about = None,
)]
struct Cli {
    /// Show DEBUG lines and replay each repository's full log after it finishes.
    #[arg(short, long)]
    verbose: bool,

    /// Report what would happen without modifying any repository.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Root directory containing the repositories (default: ~/git).
    #[arg(short = 'd', long = "dir", value_name = "PATH")]
    root: Option<PathBuf>,

    /// Repositories processed concurrently per batch (default: 3).
    #[arg(short = 'b', long = "batch", value_name = "N",
          value_parser = clap::value_parser!(u64).range(1..))]
    batch: Option<u64>,

    /// Per-repository time limit in seconds (default: 300).
    #[arg(short = 't', long = "timeout", value_name = "SECS",
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Config file (default: ~/.reposync/config.yaml).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Shared run log (default: ~/.reposync/logs/reposync.log).
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Also write the run summary as JSON to this path.
    #[arg(long, value_name = "PATH")]
    summary_json: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            root: self.root.clone(),
            verbose: self.verbose,
            dry_run: self.dry_run,
            batch_size: self.batch.map(|b| b as usize),
            job_timeout_secs: self.timeout,
            config_path: self.config.clone(),
            log_file: self.log_file.clone(),
        }
    }

    fn run(self) -> Result<i32> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
        let env: EnvVars = std::env::vars().collect();
        let settings = Settings::load_at(&home, &self.overrides(), &env)?;
        let dry_run = settings.dry_run;
        let root = settings.root.clone();

        let summary = reposync_runner::start_blocking(settings, &home)?;
        report::print_summary(&summary, &root, dry_run);

        if let Some(path) = &self.summary_json {
            reposync_runner::write_summary_json(&summary, path)
                .with_context(|| format!("failed to write summary to {}", path.display()))?;
        }
        Ok(summary.exit_code())
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Usage errors count as setup failures; help and version do not.
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    let code = match cli.run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            1
        }
    };
    std::process::exit(code);
}
