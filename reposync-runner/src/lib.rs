//! Run orchestration: bounded batch scheduling, timeouts, result aggregation
//! and the top-level run loop.

pub mod aggregate;
mod error;
pub mod log_rotation;
mod runtime;
pub mod scheduler;

pub use aggregate::ResultAggregator;
pub use error::RunnerError;
pub use runtime::{run, start_blocking, write_summary_json};
pub use scheduler::{BatchScheduler, JobRecord, RepoWorker};
