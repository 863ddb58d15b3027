use std::sync::Arc;

use crossbeam_channel::unbounded;

use crate::failgate::FailGate;
use crate::janitor::Janitor;
use crate::job::{AdmittedJob, JobContext, JobError, JobId, JobReport, JobStatus};
use crate::progress::RemainingCounter;
use crate::ThreadCount;

/// State shared by all workers for the duration of one batch run.
pub(crate) struct RunShared {
    pub remaining: RemainingCounter,
    pub fail_gate: FailGate,
    pub total_threads: ThreadCount,
    pub janitor: Janitor,
}

pub(crate) struct PoolRun {
    pub reports: Vec<JobReport>,
    /// False when the pool mechanism itself failed (a worker thread could not
    /// be spawned or died); individual job failures do not affect this.
    pub dispatch_ok: bool,
}

/// Runs all admitted jobs and collects their reports.
///
/// With one process the jobs run sequentially in admission order, in-process,
/// through the same per-job wrapper as the parallel path, so the two paths
/// are observationally equivalent for order-independent jobs.
pub(crate) fn execute_batch(
    jobs: Vec<AdmittedJob>,
    total_processes: ThreadCount,
    shared: Arc<RunShared>,
) -> PoolRun {
    if total_processes <= 1 {
        let reports = jobs.into_iter().map(|job| run_job(job, &shared)).collect();
        PoolRun {
            reports,
            dispatch_ok: true,
        }
    } else {
        execute_parallel(jobs, total_processes, shared)
    }
}

fn execute_parallel(
    jobs: Vec<AdmittedJob>,
    total_processes: ThreadCount,
    shared: Arc<RunShared>,
) -> PoolRun {
    let (job_tx, job_rx) = unbounded();
    let (report_tx, report_rx) = unbounded();

    for job in jobs {
        // Receivers outlive this loop, the sends cannot fail.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let mut handles = Vec::with_capacity(total_processes as usize);
    for i in 0..total_processes {
        let job_rx = job_rx.clone();
        let report_tx = report_tx.clone();
        let shared = shared.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("shoal-worker-{i}"))
            .spawn(move || {
                for job in job_rx.iter() {
                    if report_tx.send(run_job(job, &shared)).is_err() {
                        break;
                    }
                }
            });
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(error) => {
                // Pool-level failure: report what has arrived so far and bail
                // out. Workers already running keep draining the queue in the
                // background; they are only killed by an emergency shutdown.
                log::error!("Cannot spawn worker thread: {error}");
                return PoolRun {
                    reports: report_rx.try_iter().collect(),
                    dispatch_ok: false,
                };
            }
        }
    }
    drop(job_rx);
    drop(report_tx);

    let mut dispatch_ok = true;
    for handle in handles {
        if handle.join().is_err() {
            log::error!("Worker thread panicked");
            dispatch_ok = false;
        }
    }

    PoolRun {
        reports: report_rx.try_iter().collect(),
        dispatch_ok,
    }
}

/// Wrapper executed once per admitted job, by whichever worker claims it.
///
/// The fail gate is consulted exactly once, before the body runs; job errors
/// become fail markers and never propagate, so the pool stays healthy. The
/// remaining counter is decremented exactly once whatever the outcome.
fn run_job(job: AdmittedJob, shared: &RunShared) -> JobReport {
    let AdmittedJob {
        id,
        work_dir,
        log_file,
        work,
    } = job;

    let status = if shared.fail_gate.is_tripped() {
        log::warn!("Other jobs failed. Will not start job {id}");
        JobStatus::Skipped
    } else {
        log::debug!("Start running job {id} in directory {work_dir:?}");
        match execute_work(&*work, &work_dir, &log_file, shared) {
            Ok(()) => {
                log::debug!("Finished running job {id}");
                shared.janitor.job_cleanup(&work_dir);
                JobStatus::Finished
            }
            Err(error) => {
                log::error!("Failed job {id}: {error}");
                if let Err(record_error) = shared.fail_gate.record(&id) {
                    log::error!("Cannot record fail marker for job {id}: {record_error}");
                }
                JobStatus::Failed
            }
        }
    };

    let remaining = shared.remaining.decrement();
    log::debug!("Job {id} done, {remaining} job(s) remaining");

    JobReport {
        id,
        work_dir,
        status,
    }
}

fn execute_work(
    work: &dyn crate::job::Job,
    work_dir: &std::path::Path,
    log_file: &std::path::Path,
    shared: &RunShared,
) -> Result<(), JobError> {
    std::fs::create_dir_all(work_dir)?;
    let ctx = JobContext::new(&shared.remaining, shared.total_threads, work_dir, log_file);
    work.run(&ctx)
}
