use std::sync::Mutex;

use crate::JobCount;

/// Shared count of not-yet-finished jobs in the current batch.
///
/// All mutation goes through [`decrement`](RemainingCounter::decrement), a
/// read-modify-write under a single lock, so no two jobs can observe the same
/// transition. Created per batch; nothing persists across runs.
pub struct RemainingCounter {
    remaining: Mutex<JobCount>,
}

impl RemainingCounter {
    pub fn new(count: JobCount) -> Self {
        Self {
            remaining: Mutex::new(count),
        }
    }

    /// Records one finished job and returns the new count.
    /// Called exactly once per job, whatever its outcome.
    pub fn decrement(&self) -> JobCount {
        let mut remaining = self.remaining.lock().expect("remaining counter poisoned");
        debug_assert!(*remaining > 0, "more decrements than admitted jobs");
        *remaining = remaining.saturating_sub(1);
        *remaining
    }

    pub fn read(&self) -> JobCount {
        *self.remaining.lock().expect("remaining counter poisoned")
    }
}
