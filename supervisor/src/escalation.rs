use nix::sys::signal::Signal;
use std::sync::atomic::{AtomicU8, Ordering};

/// Signal ladder for repeated user stop requests: interrupt first so the
/// guest can clean up, then terminate, then kill. Wraps after kill.
#[derive(Debug, Default)]
pub struct StopEscalation {
    attempts: AtomicU8,
}

impl StopEscalation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_signal(&self) -> Signal {
        let attempt = self
            .attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some((n + 1) % 3))
            .unwrap_or(0);
        match attempt {
            0 => Signal::SIGINT,
            1 => Signal::SIGTERM,
            _ => Signal::SIGKILL,
        }
    }

    /// Start over from SIGINT, e.g. after the container is started again.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }
}
