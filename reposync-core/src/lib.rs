//! reposync core library: domain types, configuration, discovery, errors.
//!
//! - [`types`]: repository descriptors, outcomes, stash records, run summaries
//! - [`config`]: layered settings (flags, environment, YAML file) and hooks
//! - [`discovery`]: enumerate repository directories under the root
//! - [`paths`]: `~/.reposync/` layout
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod discovery;
pub mod error;
pub mod paths;
pub mod types;

pub use config::{HookCommand, HookSpec, Overrides, Settings};
pub use error::ConfigError;
pub use types::{Outcome, RepoName, RepoResult, RepositoryDescriptor, RunSummary, StashRecord};
