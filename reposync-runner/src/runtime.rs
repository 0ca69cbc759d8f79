use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reposync_core::{discovery, paths, RunSummary, Settings};
use reposync_sync::{CommandHooks, GitCli, Level, MachineOptions, RepoStateMachine, SynchronizedLogger};

use crate::aggregate::ResultAggregator;
use crate::error::{io_err, RunnerError};
use crate::log_rotation;
use crate::scheduler::BatchScheduler;

/// Tag for run-level lines in the shared log.
const RUN_TAG: &str = "reposync";

/// Build a multi-threaded runtime and process every repository under
/// `settings.root`, blocking until the run completes.
pub fn start_blocking(settings: Settings, home: &Path) -> Result<RunSummary, RunnerError> {
    init_tracing(settings.verbose);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(settings, home.to_path_buf()))
}

/// One full run: setup checks, discovery, batched processing, summary.
///
/// Only setup problems are errors; every repository-level problem ends up as
/// an outcome in the returned summary.
pub async fn run(settings: Settings, home: PathBuf) -> Result<RunSummary, RunnerError> {
    let git = GitCli::default();
    let version = git.version().await.map_err(RunnerError::GitUnavailable)?;
    tracing::debug!(%version, "git available");

    let repos = discovery::discover(&settings.root, &settings.skip)?;
    tracing::info!(root = %settings.root.display(), count = repos.len(), "discovered repositories");

    log_rotation::rotate_run_log(&settings.log_file);
    let logger = Arc::new(
        SynchronizedLogger::open(&settings.log_file, settings.verbose).map_err(RunnerError::Log)?,
    );

    if settings.dry_run {
        logger
            .log(Level::Info, RUN_TAG, "[DRY-RUN] no repository will be modified")
            .await;
    }
    if repos.is_empty() {
        logger
            .log(
                Level::Info,
                RUN_TAG,
                &format!("no repositories under {}", settings.root.display()),
            )
            .await;
        return Ok(ResultAggregator::new().finish());
    }
    logger
        .log(
            Level::Info,
            RUN_TAG,
            &format!(
                "syncing {} repositories under {} ({} at a time, {}s per repository)",
                repos.len(),
                settings.root.display(),
                settings.batch_size,
                settings.job_timeout.as_secs()
            ),
        )
        .await;

    let run_dir = paths::run_dir(&home, std::process::id());
    let jobs_dir = paths::jobs_dir(&run_dir);
    fs::create_dir_all(&jobs_dir).map_err(|e| io_err(&jobs_dir, e))?;

    let hooks = CommandHooks::new(settings.hooks.clone());
    let options = MachineOptions::new(
        settings.remote.clone(),
        settings.default_branches.clone(),
        settings.dry_run,
    );
    let machine = RepoStateMachine::new(Arc::new(git), Arc::new(hooks), options);
    let scheduler =
        BatchScheduler::new(settings.batch_size, settings.job_timeout).with_jobs_dir(&jobs_dir);

    let mut aggregator = ResultAggregator::new();
    for record in scheduler
        .run_all(Arc::new(machine), Arc::clone(&logger), &repos)
        .await
    {
        aggregator.record_job(&record);
    }

    if let Err(err) = fs::remove_dir_all(&run_dir) {
        tracing::debug!(path = %run_dir.display(), error = %err, "run directory not removed");
    }

    let summary = aggregator.finish();
    let level = if summary.is_success() {
        Level::Success
    } else {
        Level::Error
    };
    logger.log(level, RUN_TAG, &summary.summary_line()).await;
    Ok(summary)
}

/// Persist `summary` as pretty JSON. Written to a sibling temp file first so
/// readers never observe a partial document.
pub fn write_summary_json(summary: &RunSummary, path: &Path) -> Result<(), RunnerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let payload = serde_json::to_string_pretty(summary)?;
    fs::write(&tmp, payload).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use reposync_core::{Outcome, RepoName, RepoResult};
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn summary_json_round_trips_and_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("summary.json");

        let mut summary = RunSummary::new(Utc::now());
        summary.record(RepoResult {
            repo: RepoName::from("repoA"),
            outcome: Outcome::Timeout,
            elapsed_ms: 300_000,
        });
        write_summary_json(&summary, &path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"TIMEOUT\""));
        let back: RunSummary = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, summary);
        assert!(!dir.path().join("out").join("summary.json.tmp").exists());
    }
}
