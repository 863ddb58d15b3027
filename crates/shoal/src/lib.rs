pub mod batch;
pub mod budget;
pub mod common;
pub mod failgate;
pub mod janitor;
pub mod job;
pub mod progress;
pub mod shutdown;

mod pool;

pub use crate::batch::{Batch, BatchConfig, BatchConfigBuilder};
pub use crate::budget::thread_budget;
pub use crate::common::{Map, Set};
pub use crate::failgate::FailGate;
pub use crate::janitor::{Janitor, WorkTree};
pub use crate::job::{Job, JobContext, JobError, JobId, JobReport, JobSpec, JobStatus};
pub use crate::progress::RemainingCounter;
pub use crate::shutdown::ShutdownController;

pub type Error = crate::common::error::ShoalError;
pub type Result<T> = std::result::Result<T, Error>;

/// Number of worker threads or thread-budget units.
pub type ThreadCount = u32;

/// Number of jobs in a batch.
pub type JobCount = u32;
