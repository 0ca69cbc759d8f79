//! Fixed-size batch execution with a per-job deadline.
//!
//! Repositories run in batches of at most `batch_size`; a batch is only
//! launched once every job of the previous batch has finished, timed out, or
//! crashed. A job past its deadline is aborted: dropping its future kills any
//! git or hook child process it spawned.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use reposync_core::{Outcome, RepoName, RepositoryDescriptor};
use reposync_sync::{unprinted_lines, Level, RepoLogger, RepoStateMachine, SynchronizedLogger};

/// One unit of per-repository work.
#[async_trait]
pub trait RepoWorker: Send + Sync + 'static {
    async fn process(&self, repo: &RepositoryDescriptor, log: &RepoLogger) -> Outcome;
}

#[async_trait]
impl RepoWorker for RepoStateMachine {
    async fn process(&self, repo: &RepositoryDescriptor, log: &RepoLogger) -> Outcome {
        self.run(repo, log).await
    }
}

/// Terminal record for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub repo: RepoName,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

struct RunningJob {
    repo: RepoName,
    handle: JoinHandle<Outcome>,
    job_log: Option<PathBuf>,
    started: Instant,
}

#[derive(Debug, Clone)]
pub struct BatchScheduler {
    batch_size: usize,
    job_timeout: Duration,
    jobs_dir: Option<PathBuf>,
}

impl BatchScheduler {
    /// A `batch_size` of zero is treated as one.
    pub fn new(batch_size: usize, job_timeout: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            job_timeout,
            jobs_dir: None,
        }
    }

    /// Give every job a private log file under `dir`.
    pub fn with_jobs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.jobs_dir = Some(dir.into());
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Process every repository and return one record per repository, in
    /// input order.
    pub async fn run_all(
        &self,
        worker: Arc<dyn RepoWorker>,
        logger: Arc<SynchronizedLogger>,
        repos: &[RepositoryDescriptor],
    ) -> Vec<JobRecord> {
        let batches = repos.len().div_ceil(self.batch_size);
        let mut records = Vec::with_capacity(repos.len());

        for (index, batch) in repos.chunks(self.batch_size).enumerate() {
            tracing::info!(batch = index + 1, of = batches, jobs = batch.len(), "starting batch");

            let running: Vec<RunningJob> = batch
                .iter()
                .map(|repo| self.launch(&worker, &logger, repo))
                .collect();

            for job in running {
                records.push(self.collect(&logger, job).await);
            }
        }
        records
    }

    fn launch(
        &self,
        worker: &Arc<dyn RepoWorker>,
        logger: &Arc<SynchronizedLogger>,
        repo: &RepositoryDescriptor,
    ) -> RunningJob {
        let wanted = self
            .jobs_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.log", repo.name)));
        let (log, job_log) = match logger.for_job(&repo.name, wanted.as_deref()) {
            Ok(log) => (log, wanted),
            Err(err) => {
                tracing::warn!(repo = %repo.name, error = %err, "job log unavailable");
                (logger.tagged(&repo.name), None)
            }
        };

        let worker = Arc::clone(worker);
        let descriptor = repo.clone();
        let handle = tokio::spawn(async move { worker.process(&descriptor, &log).await });

        RunningJob {
            repo: repo.name.clone(),
            handle,
            job_log,
            started: Instant::now(),
        }
    }

    async fn collect(&self, logger: &SynchronizedLogger, mut job: RunningJob) -> JobRecord {
        let deadline = job.started + self.job_timeout;
        let repo = job.repo.as_str();

        let outcome = match tokio::time::timeout_at(deadline, &mut job.handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                logger
                    .log(Level::Error, repo, &format!("worker crashed: {err}"))
                    .await;
                Outcome::Unknown
            }
            Err(_) => {
                job.handle.abort();
                let _ = (&mut job.handle).await;
                logger
                    .log(
                        Level::Error,
                        repo,
                        &format!(
                            "timed out after {}s and was aborted; check its branch and `git stash list`",
                            self.job_timeout.as_secs()
                        ),
                    )
                    .await;
                Outcome::Timeout
            }
        };

        if let Some(path) = &job.job_log {
            finish_job_log(logger, repo, outcome, path).await;
        }

        JobRecord {
            repo: job.repo,
            outcome,
            elapsed: job.started.elapsed(),
        }
    }
}

/// When verbose, replay the job's raw git output (its other lines are
/// already on the console) as one block, then remove the job log.
async fn finish_job_log(logger: &SynchronizedLogger, repo: &str, outcome: Outcome, path: &Path) {
    if logger.verbose() {
        match tokio::fs::read_to_string(path).await {
            Ok(body) => {
                let replay = unprinted_lines(&body);
                if !replay.is_empty() {
                    logger.emit_block(repo, outcome.as_str(), &replay).await;
                }
            }
            Err(err) => tracing::debug!(path = %path.display(), error = %err, "job log not readable"),
        }
    }
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "could not remove job log");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
