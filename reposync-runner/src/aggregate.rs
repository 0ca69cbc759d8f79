//! Collects one terminal outcome per repository into a [`RunSummary`].

use std::collections::HashSet;
use std::time::Instant;

use chrono::Utc;

use reposync_core::{Outcome, RepoName, RepoResult, RunSummary};

use crate::scheduler::JobRecord;

#[derive(Debug)]
pub struct ResultAggregator {
    summary: RunSummary,
    seen: HashSet<RepoName>,
    started: Instant,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            summary: RunSummary::new(Utc::now()),
            seen: HashSet::new(),
            started: Instant::now(),
        }
    }

    /// Record a repository's outcome. A second outcome for the same
    /// repository is ignored; returns whether it was recorded.
    pub fn record(&mut self, repo: RepoName, outcome: Outcome, elapsed_ms: u64) -> bool {
        if !self.seen.insert(repo.clone()) {
            tracing::warn!(repo = %repo, %outcome, "duplicate outcome ignored");
            return false;
        }
        self.summary.record(RepoResult {
            repo,
            outcome,
            elapsed_ms,
        });
        true
    }

    pub fn record_job(&mut self, job: &JobRecord) -> bool {
        let elapsed_ms = u64::try_from(job.elapsed.as_millis()).unwrap_or(u64::MAX);
        self.record(job.repo.clone(), job.outcome, elapsed_ms)
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Stamp the wall-clock duration and hand back the summary.
    pub fn finish(mut self) -> RunSummary {
        self.summary.duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn job(name: &str, outcome: Outcome) -> JobRecord {
        JobRecord {
            repo: RepoName::from(name),
            outcome,
            elapsed: Duration::from_millis(1500),
        }
    }

    #[test]
    fn totals_partition_the_repository_set() {
        let mut agg = ResultAggregator::new();
        for (name, outcome) in [
            ("a", Outcome::Success),
            ("b", Outcome::Success),
            ("c", Outcome::Failed),
            ("d", Outcome::Skipped),
            ("e", Outcome::Timeout),
        ] {
            assert!(agg.record_job(&job(name, outcome)));
        }
        let summary = agg.finish();

        assert_eq!(summary.total, 5);
        let sum: usize = Outcome::ALL.iter().map(|o| summary.count(*o)).sum();
        assert_eq!(sum, summary.total);
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(summary.results[0].elapsed_ms, 1500);
    }

    #[test]
    fn duplicate_outcome_is_ignored() {
        let mut agg = ResultAggregator::new();
        assert!(agg.record(RepoName::from("a"), Outcome::Success, 1));
        assert!(!agg.record(RepoName::from("a"), Outcome::Failed, 1));
        assert_eq!(agg.summary().total, 1);
        assert_eq!(agg.summary().failed, 0);
    }

    #[test]
    fn skipped_only_run_succeeds() {
        let mut agg = ResultAggregator::new();
        agg.record(RepoName::from("plain"), Outcome::Skipped, 0);
        assert_eq!(agg.finish().exit_code(), 0);
    }

    #[test]
    fn unknown_outcome_fails_the_run() {
        let mut agg = ResultAggregator::new();
        agg.record(RepoName::from("crashed"), Outcome::Unknown, 0);
        let summary = agg.finish();
        assert_eq!(summary.unknown, 1);
        assert_eq!(summary.exit_code(), 1);
    }
}
