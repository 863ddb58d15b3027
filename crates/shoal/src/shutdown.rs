use signal_hook::consts::{SIGALRM, SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::iterator::Signals;

/// Termination signals that trigger emergency teardown. SIGCHLD, SIGPIPE,
/// SIGTSTP and SIGCONT stay unregistered: they are routine process
/// housekeeping, not a user-requested stop.
const SHUTDOWN_SIGNALS: &[i32] = &[SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2, SIGALRM];

/// Listens for process-termination signals for the duration of a batch.
///
/// Lifecycle: armed -> triggered -> terminated. When the first registered
/// signal arrives, the injected teardown callback runs (workers are not
/// waited for) and the process exits with a non-zero status; this transition
/// never returns control to the caller. [`disarm`](ShutdownController::disarm)
/// or dropping the controller unregisters the handler without triggering it.
pub struct ShutdownController {
    signal_thread: Option<std::thread::JoinHandle<()>>,
    signal_handle: signal_hook::iterator::Handle,
}

impl ShutdownController {
    pub fn arm<F>(teardown: F) -> crate::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut signals = Signals::new(SHUTDOWN_SIGNALS)
            .map_err(|e| format!("Cannot create signal set: {e}"))?;
        let signal_handle = signals.handle();
        let signal_thread = std::thread::spawn(move || {
            if let Some(signal) = signals.forever().next() {
                log::error!("Stopping! Signal received: {signal}");
                teardown();
                std::process::exit(1);
            }
        });
        Ok(Self {
            signal_thread: Some(signal_thread),
            signal_handle,
        })
    }

    /// Stops listening without triggering the teardown.
    pub fn disarm(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        self.signal_handle.close();
        if let Some(thread) = self.signal_thread.take() {
            thread.join().expect("Signal thread crashed");
        }
    }
}

impl Drop for ShutdownController {
    fn drop(&mut self) {
        if self.signal_thread.is_some() {
            self.stop_thread();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_disarm_does_not_trigger_teardown() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let controller = ShutdownController::arm(move || flag.store(true, Ordering::SeqCst))
            .expect("cannot arm controller");
        controller.disarm();
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_unregisters_handler() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        {
            let _controller =
                ShutdownController::arm(move || flag.store(true, Ordering::SeqCst)).unwrap();
        }
        assert!(!fired.load(Ordering::SeqCst));
    }
}
