use std::path::{Path, PathBuf};

use crate::common::error::ShoalError;

pub fn absolute_path(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        let env = std::env::current_dir().expect("Cannot get current working directory");
        env.join(path)
    }
}

/// Creates a directory that must not exist yet. Used for the per-batch
/// fail-marker and log directories, which must start empty.
pub fn create_fresh_dir(path: &Path) -> crate::Result<()> {
    std::fs::create_dir(path)
        .map_err(|e| ShoalError::SetupError(format!("Error creating directory {path:?}: {e}")))
}
