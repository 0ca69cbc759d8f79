//! # reposync-sync
//!
//! Per-repository synchronization: the git command layer, the hook executor,
//! the shared log sink, and the state machine that drives one repository
//! through validate → protect → sync → hook → restore.

pub mod error;
pub mod git;
pub mod hook;
pub mod logger;
pub mod machine;

pub use error::SyncError;
pub use git::{GitCli, GitOps, GitOutput, StashEntry};
pub use hook::{CommandHooks, HookExecutor, HookStatus, NoHooks};
pub use logger::{unprinted_lines, Level, RepoLogger, SynchronizedLogger};
pub use machine::{MachineOptions, RepoStateMachine, State};
