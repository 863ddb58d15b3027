use std::fs::File;
use std::path::{Path, PathBuf};

use crate::common::error::ShoalError;
use crate::job::JobId;

/// Filesystem-backed fail-fast protocol shared by all workers.
///
/// A failed job leaves a zero-byte marker named by its id in the marker
/// directory. Workers consult the gate once, before starting a job; a tripped
/// gate prevents that job's body from running but does not cancel jobs that
/// are already past the check.
#[derive(Clone)]
pub struct FailGate {
    dir: PathBuf,
}

impl FailGate {
    /// Creates the marker directory. The directory must not exist yet so a
    /// batch never starts with stale markers.
    pub fn create(dir: PathBuf) -> crate::Result<Self> {
        std::fs::create_dir(&dir)
            .map_err(|e| ShoalError::SetupError(format!("Error creating directory {dir:?}: {e}")))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Advisory check consulted before starting a job. Lock-free: it may race
    /// with a concurrent [`record`](FailGate::record), so a job can
    /// occasionally start just before a very recent marker becomes visible.
    pub fn is_tripped(&self) -> bool {
        match std::fs::read_dir(&self.dir) {
            Ok(mut entries) => entries.next().is_some(),
            Err(error) => {
                log::warn!("Cannot list fail-marker directory {:?}: {error}", self.dir);
                false
            }
        }
    }

    /// Records a fail marker for the given job id.
    pub fn record(&self, id: &JobId) -> std::io::Result<()> {
        File::create(self.dir.join(id.as_str()))?;
        Ok(())
    }

    /// Authoritative post-run check: did any job record a marker?
    pub fn has_failures(&self) -> crate::Result<bool> {
        Ok(!self.failed_ids()?.is_empty())
    }

    /// Ids of all jobs that recorded a marker, sorted.
    pub fn failed_ids(&self) -> crate::Result<Vec<JobId>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            ids.push(JobId::new(entry.file_name().to_string_lossy()));
        }
        ids.sort();
        Ok(ids)
    }
}
