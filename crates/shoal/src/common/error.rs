use thiserror::Error;

use crate::common::error::ShoalError::GenericError;

#[derive(Debug, Error)]
pub enum ShoalError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Setup error: {0}")]
    SetupError(String),
    /// At least one job recorded a fail marker, or the pool itself failed.
    /// Per-job detail lives in the fail-marker directory and the job logs.
    #[error("At least one job failed! Stopping...")]
    BatchFailed,
    #[error("Error: {0}")]
    GenericError(String),
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(GenericError(message))
}

impl From<String> for ShoalError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}

impl From<&str> for ShoalError {
    fn from(e: &str) -> Self {
        GenericError(e.to_string())
    }
}
