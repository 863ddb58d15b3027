use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::failgate::FailGate;

/// Root of the per-job working directories for one batch.
pub enum WorkTree {
    /// Removed together with everything under it when the `TempDir` is
    /// closed or dropped. Used when cleanup is enabled.
    Ephemeral(TempDir),
    /// Kept on disk so a failed batch can be inspected afterwards.
    Persistent(PathBuf),
}

impl WorkTree {
    pub fn path(&self) -> &Path {
        match self {
            WorkTree::Ephemeral(tmp) => tmp.path(),
            WorkTree::Persistent(path) => path,
        }
    }
}

/// Removes the engine's working state per the `clean` policy.
#[derive(Clone, Copy)]
pub struct Janitor {
    clean: bool,
}

impl Janitor {
    pub fn new(clean: bool) -> Self {
        Self { clean }
    }

    pub fn clean_enabled(&self) -> bool {
        self.clean
    }

    /// Removes one job's working directory after the job succeeded.
    /// Best-effort; the job's results have already left the directory.
    pub fn job_cleanup(&self, work_dir: &Path) {
        if !self.clean || !work_dir.exists() {
            return;
        }
        log::debug!("Deleting job dir {work_dir:?}");
        if let Err(error) = std::fs::remove_dir_all(work_dir) {
            log::warn!("Could not delete job dir {work_dir:?}: {error}");
        }
    }

    /// Post-batch cleanup after a fully successful run: the fail-marker
    /// directory, the per-job log directory (the caller has already
    /// concatenated the logs) and the working-directory tree.
    pub fn final_cleanup(
        &self,
        fail_gate: FailGate,
        logs_dir: &Path,
        work_tree: WorkTree,
    ) -> crate::Result<()> {
        if !self.clean {
            log::debug!("Cleanup disabled, keeping all working directories");
            return Ok(());
        }

        std::fs::remove_dir_all(fail_gate.dir())?;
        log::debug!("Deleting log directory {logs_dir:?}");
        std::fs::remove_dir_all(logs_dir)?;

        match work_tree {
            WorkTree::Ephemeral(tmp) => {
                if let Err(error) = tmp.close() {
                    log::warn!("Could not remove temporary working tree: {error}");
                }
            }
            WorkTree::Persistent(_) => {}
        }
        Ok(())
    }

    /// Emergency teardown of the working tree, used on interruption and on
    /// internal errors. Best-effort: the process is already on its way out,
    /// so failures are logged and never raised.
    pub fn emergency_cleanup(work_tree_path: &Path) {
        if !work_tree_path.exists() {
            return;
        }
        if let Err(error) = std::fs::remove_dir_all(work_tree_path) {
            log::warn!("Could not remove working tree {work_tree_path:?}: {error}");
        }
    }
}
