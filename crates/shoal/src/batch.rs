use std::path::{Path, PathBuf};
use std::sync::Arc;

use derive_builder::Builder;

use crate::common::error::ShoalError;
use crate::common::fsutils::{absolute_path, create_fresh_dir};
use crate::failgate::FailGate;
use crate::janitor::{Janitor, WorkTree};
use crate::job::{AdmittedJob, JobId, JobReport, JobSpec};
use crate::pool::{execute_batch, RunShared};
use crate::progress::RemainingCounter;
use crate::shutdown::ShutdownController;
use crate::{JobCount, Map, ThreadCount};

/// Jobs with a work size at or below this threshold never pay off a worker's
/// setup cost and would distort the adaptive thread budget, so they are
/// dropped before they are counted or dispatched.
pub const MIN_WORK_SIZE: u64 = 2;

/// Environment variable overriding where the ephemeral working tree is
/// created; takes precedence over `TMPDIR`.
pub const TMP_ROOT_ENV: &str = "SHOAL_TMPDIR";

const FAILS_DIR: &str = ".fails";
const LOGS_DIR: &str = "logs";
const PERSISTENT_WORK_DIR: &str = "jobs";

#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned")]
pub struct BatchConfig {
    /// Directory under which the engine creates the fail-marker and log
    /// directories. Also the final fallback for the tmp root.
    pub output_dir: PathBuf,
    /// Size of the worker pool; 1 runs the batch sequentially, in-process.
    #[builder(default = "1")]
    pub total_processes: ThreadCount,
    /// Global thread ceiling shared by all running jobs via the budget.
    #[builder(default = "1")]
    pub total_threads: ThreadCount,
    /// Remove all working state after a successful run and on interruption.
    /// When disabled, a persistent working tree is kept for inspection.
    #[builder(default = "true")]
    pub clean: bool,
    /// Explicit root for the ephemeral working tree. When absent, the
    /// `SHOAL_TMPDIR` / `TMPDIR` / output-dir chain applies.
    #[builder(default)]
    pub tmp_root: Option<PathBuf>,
}

/// One batch run: owns the fail gate, the log directory and the working tree,
/// keeps a shutdown controller armed for its whole lifetime, and executes the
/// admitted jobs over the worker pool.
pub struct Batch {
    config: BatchConfig,
    fail_gate: FailGate,
    logs_dir: PathBuf,
    work_tree: WorkTree,
    janitor: Janitor,
    shutdown: ShutdownController,
}

impl Batch {
    /// Sets up the on-disk state for a batch run. Fails fast, before any job
    /// is admitted: a missing tmp root or an unusable output directory stops
    /// the run here.
    pub fn new(config: BatchConfig) -> crate::Result<Self> {
        if config.total_processes < 1 {
            return Err(ShoalError::SetupError(
                "total_processes must be at least 1".to_string(),
            ));
        }
        if config.total_threads < 1 {
            return Err(ShoalError::SetupError(
                "total_threads must be at least 1".to_string(),
            ));
        }

        let output_dir = absolute_path(config.output_dir.clone());
        std::fs::create_dir_all(&output_dir).map_err(|e| {
            ShoalError::SetupError(format!("Error creating directory {output_dir:?}: {e}"))
        })?;

        let fail_gate = FailGate::create(output_dir.join(FAILS_DIR))?;
        let logs_dir = output_dir.join(LOGS_DIR);
        create_fresh_dir(&logs_dir)?;

        let work_tree = if config.clean {
            let tmp_root = resolve_tmp_root(config.tmp_root.clone(), &output_dir);
            if !tmp_root.exists() {
                return Err(ShoalError::SetupError(format!(
                    "Temporary directory {tmp_root:?} not found. Cannot continue"
                )));
            }
            let tmp = tempfile::Builder::new()
                .prefix("shoal.tmp.")
                .tempdir_in(&tmp_root)
                .map_err(|e| {
                    ShoalError::SetupError(format!(
                        "Error creating temporary directory under {tmp_root:?}: {e}"
                    ))
                })?;
            WorkTree::Ephemeral(tmp)
        } else {
            let work_dir = output_dir.join(PERSISTENT_WORK_DIR);
            create_fresh_dir(&work_dir)?;
            WorkTree::Persistent(work_dir)
        };
        log::debug!("Working tree root: {:?}", work_tree.path());

        let clean = config.clean;
        let work_tree_path = work_tree.path().to_path_buf();
        let shutdown = ShutdownController::arm(move || {
            if clean {
                Janitor::emergency_cleanup(&work_tree_path);
            }
        })?;

        Ok(Self {
            config: BatchConfig {
                output_dir,
                ..config
            },
            fail_gate,
            logs_dir,
            work_tree,
            janitor: Janitor::new(clean),
            shutdown,
        })
    }

    /// Runs the batch to completion and returns the per-job reports, keyed by
    /// job id and including jobs the fail gate skipped.
    ///
    /// Returns [`ShoalError::BatchFailed`] when any job recorded a fail
    /// marker or the pool itself failed; working state is then torn down per
    /// the `clean` policy, leaving markers and logs behind for inspection.
    pub fn run(self, jobs: Vec<JobSpec>) -> crate::Result<Map<JobId, JobReport>> {
        match self.execute(jobs) {
            Ok(completed) => {
                self.finalize()?;
                Ok(completed)
            }
            Err(error) => {
                self.emergency_stop();
                Err(error)
            }
        }
    }

    fn execute(&self, jobs: Vec<JobSpec>) -> crate::Result<Map<JobId, JobReport>> {
        let admitted = self.admit(jobs);
        if admitted.is_empty() {
            log::warn!("No jobs left after admission filtering");
        }
        log::debug!(
            "Will run {} job(s) on {} worker(s)",
            admitted.len(),
            self.config.total_processes
        );

        let shared = Arc::new(RunShared {
            remaining: RemainingCounter::new(admitted.len() as JobCount),
            fail_gate: self.fail_gate.clone(),
            total_threads: self.config.total_threads,
            janitor: self.janitor,
        });
        let run = execute_batch(admitted, self.config.total_processes, shared.clone());
        log::debug!(
            "Final value of remaining counter: {}",
            shared.remaining.read()
        );

        let all_ok = run.dispatch_ok && !self.fail_gate.has_failures()?;
        if !all_ok {
            return Err(ShoalError::BatchFailed);
        }

        Ok(run
            .reports
            .into_iter()
            .map(|report| (report.id.clone(), report))
            .collect())
    }

    /// Drops trivially small jobs and binds the rest to their working
    /// directories and log files, in id order.
    fn admit(&self, mut jobs: Vec<JobSpec>) -> Vec<AdmittedJob> {
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        let total = jobs.len();
        let mut admitted = Vec::with_capacity(total);
        for (i, spec) in jobs.into_iter().enumerate() {
            if spec.work_size <= MIN_WORK_SIZE {
                log::debug!(
                    "Not constructing job {} because its work size is only {} ({} of {})",
                    spec.id,
                    spec.work_size,
                    i + 1,
                    total
                );
                continue;
            }
            log::debug!("Constructing job {} ({} of {})", spec.id, i + 1, total);
            admitted.push(AdmittedJob {
                work_dir: self.work_tree.path().join(spec.id.as_str()),
                log_file: self.logs_dir.join(format!("{}.log", spec.id)),
                id: spec.id,
                work: spec.work,
            });
        }
        admitted
    }

    fn finalize(self) -> crate::Result<()> {
        let Batch {
            fail_gate,
            logs_dir,
            work_tree,
            janitor,
            shutdown,
            ..
        } = self;
        shutdown.disarm();
        janitor.final_cleanup(fail_gate, &logs_dir, work_tree)
    }

    fn emergency_stop(&self) {
        if self.janitor.clean_enabled() {
            Janitor::emergency_cleanup(self.work_tree.path());
        }
    }
}

fn resolve_tmp_root(explicit: Option<PathBuf>, output_dir: &Path) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os(TMP_ROOT_ENV).map(PathBuf::from))
        .or_else(|| std::env::var_os("TMPDIR").map(PathBuf::from))
        .map(absolute_path)
        .unwrap_or_else(|| output_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobContext, JobError, JobStatus};
    use std::sync::Mutex;

    fn config(output_dir: PathBuf) -> BatchConfigBuilder {
        BatchConfigBuilder::default().output_dir(output_dir)
    }

    fn ok_job(id: &str, work_size: u64) -> JobSpec {
        JobSpec::new(id, work_size, |_ctx: &JobContext| -> Result<(), JobError> {
            Ok(())
        })
    }

    #[test]
    fn test_scenario_all_jobs_finish() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("out");
        let budgets = Arc::new(Mutex::new(Vec::new()));

        let jobs = (0..5)
            .map(|i| {
                let budgets = budgets.clone();
                JobSpec::new(format!("job_{i}"), 100, move |ctx: &JobContext| -> Result<(), JobError> {
                    budgets.lock().unwrap().push(ctx.thread_budget());
                    Ok(())
                })
            })
            .collect();

        let batch = Batch::new(
            config(output_dir.clone())
                .total_threads(8)
                .tmp_root(Some(dir.path().to_path_buf()))
                .build()
                .unwrap(),
        )
        .unwrap();
        let completed = batch.run(jobs).unwrap();

        assert_eq!(completed.len(), 5);
        assert!(completed
            .values()
            .all(|report| report.status == JobStatus::Finished));
        // Each job reads its budget once at start; with 8 threads the shares
        // grow 1, 2, 2, 4, 8 as the batch drains.
        assert_eq!(*budgets.lock().unwrap(), vec![1, 2, 2, 4, 8]);
        // A successful clean run leaves no trace of the engine's state.
        assert!(!output_dir.join(FAILS_DIR).exists());
        assert!(!output_dir.join(LOGS_DIR).exists());
    }

    #[test]
    fn test_admission_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("out");
        let ran = Arc::new(Mutex::new(Vec::new()));

        let mut jobs = vec![
            ok_job("tiny_a", 0),
            ok_job("tiny_b", MIN_WORK_SIZE),
            ok_job("real", MIN_WORK_SIZE + 1),
        ];
        for job in &mut jobs {
            let ran = ran.clone();
            let id = job.id.clone();
            job.work = Box::new(move |_ctx: &JobContext| -> Result<(), JobError> {
                ran.lock().unwrap().push(id.clone());
                Ok(())
            });
        }

        let batch = Batch::new(config(output_dir).clean(false).build().unwrap()).unwrap();
        let completed = batch.run(jobs).unwrap();

        assert_eq!(completed.len(), 1);
        assert!(completed.contains_key(&JobId::new("real")));
        assert_eq!(*ran.lock().unwrap(), vec![JobId::new("real")]);
    }

    #[test]
    fn test_failed_job_fails_batch_and_skips_later_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("out");
        let ran = Arc::new(Mutex::new(Vec::new()));

        let mut jobs = Vec::new();
        for id in ["b", "c", "d"] {
            let ran = ran.clone();
            jobs.push(JobSpec::new(id, 100, move |_ctx: &JobContext| {
                ran.lock().unwrap().push(id);
                if id == "b" {
                    Err(JobError::from("induced failure"))
                } else {
                    Ok(())
                }
            }));
        }

        let batch = Batch::new(config(output_dir.clone()).clean(false).build().unwrap()).unwrap();
        match batch.run(jobs) {
            Err(ShoalError::BatchFailed) => {}
            other => panic!("expected BatchFailed, got {other:?}"),
        }

        // Only "b" ever ran; "c" and "d" hit the tripped gate.
        assert_eq!(*ran.lock().unwrap(), vec!["b"]);
        let markers: Vec<String> = std::fs::read_dir(output_dir.join(FAILS_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(markers, vec!["b"]);
        // The persistent working tree stays inspectable.
        assert!(output_dir.join(PERSISTENT_WORK_DIR).exists());
    }

    #[test]
    fn test_failed_clean_batch_tears_down_working_tree() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("out");

        let jobs = vec![JobSpec::new("a", 100, |_ctx: &JobContext| {
            Err(JobError::from("induced failure"))
        })];

        let batch = Batch::new(
            config(output_dir.clone())
                .tmp_root(Some(dir.path().to_path_buf()))
                .build()
                .unwrap(),
        )
        .unwrap();
        let work_tree_path = batch.work_tree.path().to_path_buf();
        assert!(batch.run(jobs).is_err());

        assert!(!work_tree_path.exists());
        // Fail markers survive the emergency teardown for inspection.
        assert!(output_dir.join(FAILS_DIR).join("a").is_file());
    }

    #[test]
    fn test_empty_batch_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let batch = Batch::new(
            config(dir.path().join("out"))
                .tmp_root(Some(dir.path().to_path_buf()))
                .build()
                .unwrap(),
        )
        .unwrap();
        let completed = batch.run(Vec::new()).unwrap();
        assert!(completed.is_empty());
    }

    #[test]
    fn test_setup_rejects_zero_workers() {
        let dir = tempfile::tempdir().unwrap();
        let result = Batch::new(
            config(dir.path().join("out"))
                .total_processes(0)
                .build()
                .unwrap(),
        );
        assert!(matches!(result, Err(ShoalError::SetupError(_))));
    }

    #[test]
    fn test_setup_rejects_missing_tmp_root() {
        let dir = tempfile::tempdir().unwrap();
        let result = Batch::new(
            config(dir.path().join("out"))
                .tmp_root(Some(dir.path().join("no_such_dir")))
                .build()
                .unwrap(),
        );
        assert!(matches!(result, Err(ShoalError::SetupError(_))));
    }

    #[test]
    fn test_parallel_batch_matches_sequential() {
        let mut outcomes = Vec::new();
        for processes in [1, 3] {
            let dir = tempfile::tempdir().unwrap();
            let jobs = (0..9)
                .map(|i| ok_job(&format!("job_{i}"), 100))
                .collect();
            let batch = Batch::new(
                config(dir.path().join("out"))
                    .total_processes(processes)
                    .total_threads(4)
                    .tmp_root(Some(dir.path().to_path_buf()))
                    .build()
                    .unwrap(),
            )
            .unwrap();
            let completed = batch.run(jobs).unwrap();
            let mut entries: Vec<(JobId, JobStatus)> = completed
                .into_iter()
                .map(|(id, report)| (id, report.status))
                .collect();
            entries.sort_by(|x, y| x.0.cmp(&y.0));
            outcomes.push(entries);
        }
        assert_eq!(outcomes[0], outcomes[1]);
    }
}
