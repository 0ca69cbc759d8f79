//! Shared, repository-tagged log sink for concurrent workers.
//!
//! Every line goes to the console and is appended to the shared run log.
//! Writers take turns through an async mutex; a writer that cannot get its
//! turn within [`LOCK_WAIT`] writes anyway rather than stalling its worker.
//!
//! A [`RepoLogger`] is the per-job handle: it tags lines with the repository
//! name and additionally keeps a private job log (including DEBUG lines and
//! raw git output) that the scheduler can replay after the job finishes.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use colored::{Color, Colorize};

use reposync_core::RepoName;

use crate::error::{io_err, SyncError};

/// Longest a writer waits for its turn before writing unlocked.
pub const LOCK_WAIT: Duration = Duration::from_secs(5);

/// Job-log tag for raw command output, which never reaches the console.
const OUTPUT_TAG: &str = "[OUTPUT]";

const REPO_PALETTE: [Color; 8] = [
    Color::Cyan,
    Color::Magenta,
    Color::Blue,
    Color::Yellow,
    Color::BrightCyan,
    Color::BrightMagenta,
    Color::BrightBlue,
    Color::BrightGreen,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Success,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Success => "SUCCESS",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }

    fn paint(self) -> String {
        let label = format!("{:<7}", self.as_str());
        match self {
            Level::Debug => label.bright_black().to_string(),
            Level::Info => label.blue().to_string(),
            Level::Success => label.green().bold().to_string(),
            Level::Warn => label.yellow().bold().to_string(),
            Level::Error => label.red().bold().to_string(),
        }
    }
}

/// Deterministic display color for a repository name (FNV-1a over its bytes).
pub fn repo_color(repo: &str) -> Color {
    let hash = repo.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    });
    REPO_PALETTE[(hash % REPO_PALETTE.len() as u64) as usize]
}

/// Single shared sink for every worker in a run.
#[derive(Debug)]
pub struct SynchronizedLogger {
    turn: tokio::sync::Mutex<()>,
    file: Option<File>,
    path: Option<PathBuf>,
    verbose: bool,
    console: bool,
}

impl SynchronizedLogger {
    /// Open (creating parent directories) `log_file` for appending.
    pub fn open(log_file: &Path, verbose: bool) -> Result<Self, SyncError> {
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|e| io_err(log_file, e))?;
        Ok(Self {
            turn: tokio::sync::Mutex::new(()),
            file: Some(file),
            path: Some(log_file.to_path_buf()),
            verbose,
            console: true,
        })
    }

    /// Console-only sink, no shared file.
    pub fn console_only(verbose: bool) -> Self {
        Self {
            turn: tokio::sync::Mutex::new(()),
            file: None,
            path: None,
            verbose,
            console: true,
        }
    }

    /// Disable console output (file output is unaffected).
    pub fn without_console(mut self) -> Self {
        self.console = false;
        self
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write one line for `repo`. DEBUG lines are dropped unless verbose.
    pub async fn log(&self, level: Level, repo: &str, message: &str) {
        if level == Level::Debug && !self.verbose {
            return;
        }

        let guard = tokio::time::timeout(LOCK_WAIT, self.turn.lock()).await.ok();
        if guard.is_none() {
            tracing::warn!("log turn not granted within {}s; writing unlocked", LOCK_WAIT.as_secs());
        }

        let now = Local::now();
        if self.console {
            let line = format!(
                "[{}] [{}] {} {}\n",
                now.format("%H:%M:%S"),
                repo.color(repo_color(repo)).bold(),
                level.paint(),
                message
            );
            let _ = std::io::stdout().lock().write_all(line.as_bytes());
        }
        if let Some(file) = &self.file {
            let line = format!(
                "{} [{}] [{}] {}\n",
                now.format("%Y-%m-%d %H:%M:%S"),
                repo,
                level.as_str(),
                message
            );
            // One write per line on an O_APPEND handle.
            if let Err(err) = (&*file).write_all(line.as_bytes()) {
                tracing::warn!("failed to append to run log: {err}");
            }
        }

        drop(guard);
    }

    /// Print a multi-line block (a replayed job log) to the console as one unit.
    pub async fn emit_block(&self, repo: &str, title: &str, body: &str) {
        if !self.console {
            return;
        }
        let _guard = tokio::time::timeout(LOCK_WAIT, self.turn.lock()).await.ok();
        let header = format!("──── {} {title} ────", repo.color(repo_color(repo)).bold());
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{header}");
        for line in body.lines() {
            let _ = writeln!(out, "  {line}");
        }
    }

    /// Per-job handle. When `job_log` is given the file is created fresh.
    pub fn for_job(
        self: &Arc<Self>,
        repo: &RepoName,
        job_log: Option<&Path>,
    ) -> Result<RepoLogger, SyncError> {
        let file = match job_log {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                }
                Some(File::create(path).map_err(|e| io_err(path, e))?)
            }
            None => None,
        };
        Ok(RepoLogger {
            shared: Arc::clone(self),
            repo: repo.to_string(),
            job_log: file,
        })
    }

    /// Per-job handle without a job log.
    pub fn tagged(self: &Arc<Self>, repo: &RepoName) -> RepoLogger {
        RepoLogger {
            shared: Arc::clone(self),
            repo: repo.to_string(),
            job_log: None,
        }
    }
}

/// Repository-scoped logging handle owned by one worker.
#[derive(Debug)]
pub struct RepoLogger {
    shared: Arc<SynchronizedLogger>,
    repo: String,
    job_log: Option<File>,
}

impl RepoLogger {
    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub async fn log(&self, level: Level, message: impl AsRef<str>) {
        let message = message.as_ref();
        self.append_job_log(level, message);
        self.shared.log(level, &self.repo, message).await;
    }

    pub async fn debug(&self, message: impl AsRef<str>) {
        self.log(Level::Debug, message).await;
    }

    pub async fn info(&self, message: impl AsRef<str>) {
        self.log(Level::Info, message).await;
    }

    pub async fn success(&self, message: impl AsRef<str>) {
        self.log(Level::Success, message).await;
    }

    pub async fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::Warn, message).await;
    }

    pub async fn error(&self, message: impl AsRef<str>) {
        self.log(Level::Error, message).await;
    }

    /// Record raw command output in the job log only.
    pub fn output(&self, label: &str, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        for line in text.lines() {
            self.append_tagged(OUTPUT_TAG, &format!("{label}: {line}"));
        }
    }

    fn append_job_log(&self, level: Level, message: &str) {
        self.append_tagged(&format!("[{}]", level.as_str()), message);
    }

    fn append_tagged(&self, tag: &str, message: &str) {
        if let Some(file) = &self.job_log {
            let line = format!("{} {tag} {message}\n", Local::now().format("%H:%M:%S"));
            let _ = (&*file).write_all(line.as_bytes());
        }
    }
}

/// Lines of a job log that only the job log has seen: raw command output.
/// Everything else was already written to the console by a verbose run.
pub fn unprinted_lines(job_log: &str) -> String {
    job_log
        .lines()
        .filter(|line| line.split(' ').nth(1) == Some(OUTPUT_TAG))
        .map(|line| format!("{line}\n"))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
