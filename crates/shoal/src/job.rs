use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::thread_budget;
use crate::progress::RemainingCounter;
use crate::ThreadCount;

/// Identifier of a single job within a batch. Unique per batch; doubles as
/// the fail-marker filename and the log filename stem.
#[derive(Clone, Hash, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct JobId(String);

impl JobId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Error produced by a job body. Converted into a fail marker by the pool;
/// it never propagates past the per-job wrapper.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("{0}")]
    Failed(String),
}

impl From<String> for JobError {
    fn from(e: String) -> Self {
        Self::Failed(e)
    }
}

impl From<&str> for JobError {
    fn from(e: &str) -> Self {
        Self::Failed(e.to_string())
    }
}

/// The unit of work executed for one job.
///
/// Implementations are expected to query [`JobContext::thread_budget`] before
/// each internally parallel phase, so that jobs still running near the tail
/// of the batch can claim threads freed by finished siblings.
pub trait Job: Send {
    fn run(&self, ctx: &JobContext) -> Result<(), JobError>;
}

impl<F> Job for F
where
    F: Fn(&JobContext) -> Result<(), JobError> + Send,
{
    fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        self(ctx)
    }
}

/// Caller-provided description of one job, before admission.
pub struct JobSpec {
    pub id: JobId,
    /// Cheap pre-computed estimate of the job size (e.g. input-record count).
    /// Jobs at or below the admission threshold are dropped before dispatch.
    pub work_size: u64,
    pub work: Box<dyn Job>,
}

impl JobSpec {
    pub fn new(id: impl Into<JobId>, work_size: u64, work: impl Job + 'static) -> Self {
        Self {
            id: id.into(),
            work_size,
            work: Box::new(work),
        }
    }
}

/// An admitted job, bound to its working directory and log file.
/// Consumed exactly once by exactly one worker; never retried or re-queued.
pub(crate) struct AdmittedJob {
    pub id: JobId,
    pub work_dir: PathBuf,
    pub log_file: PathBuf,
    pub work: Box<dyn Job>,
}

/// Execution context handed to a job body.
pub struct JobContext<'a> {
    remaining: &'a RemainingCounter,
    total_threads: ThreadCount,
    work_dir: &'a Path,
    log_file: &'a Path,
}

impl<'a> JobContext<'a> {
    pub(crate) fn new(
        remaining: &'a RemainingCounter,
        total_threads: ThreadCount,
        work_dir: &'a Path,
        log_file: &'a Path,
    ) -> Self {
        Self {
            remaining,
            total_threads,
            work_dir,
            log_file,
        }
    }

    /// Number of threads this job may currently use for its own work.
    ///
    /// Reads the live remaining-job counter, so repeated calls may return
    /// growing values as sibling jobs finish.
    pub fn thread_budget(&self) -> ThreadCount {
        thread_budget(self.total_threads, self.remaining.read())
    }

    /// Working directory owned exclusively by this job.
    pub fn work_dir(&self) -> &Path {
        self.work_dir
    }

    /// Log file assigned to this job; concatenated with its siblings by the
    /// caller after the batch finishes.
    pub fn log_file(&self) -> &Path {
        self.log_file
    }
}

/// Final state of one admitted job.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// The job body ran and returned success.
    Finished,
    /// The job body ran and returned an error; a fail marker was recorded.
    Failed,
    /// The fail gate was already tripped, the job body never ran.
    Skipped,
}

/// Per-job entry of the `completed` map returned to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: JobId,
    pub work_dir: PathBuf,
    pub status: JobStatus,
}
