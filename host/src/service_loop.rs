//! The host's polling loop: reaps the guest and keeps streaming clients
//! fed when no hardware renderer produces frames.

use crate::lifecycle::SubsystemLifecycle;
use crate::synthetic::TestPattern;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Interval between synthetic frames, roughly 30 fps.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(33);

pub const IDLE_INTERVAL: Duration = Duration::from_millis(100);

pub struct ServiceLoop {
    pattern: TestPattern,
}

impl ServiceLoop {
    pub fn new(lifecycle: &SubsystemLifecycle) -> Self {
        Self {
            pattern: TestPattern::new(lifecycle.context().geometry()),
        }
    }

    /// Poll until `stop` is set. The flag is checked once per iteration.
    pub fn run(&mut self, lifecycle: &mut SubsystemLifecycle, stop: &AtomicBool) {
        tracing::info!("Service loop started");
        while !stop.load(Ordering::SeqCst) {
            let wait = self.tick(lifecycle);
            thread::sleep(wait);
        }
        tracing::info!(frames = self.pattern.counter(), "Service loop stopped");
    }

    /// One iteration. Returns how long to sleep before the next.
    pub fn tick(&mut self, lifecycle: &mut SubsystemLifecycle) -> Duration {
        if let Some(code) = lifecycle.reap_guest() {
            tracing::info!(exit_code = code, "Guest exited, not restarting");
        }

        let ctx = lifecycle.context();
        if ctx.hardware_rendering() {
            return IDLE_INTERVAL;
        }
        let Some(streaming) = ctx.streaming() else {
            return IDLE_INTERVAL;
        };
        if !streaming.has_clients() {
            return IDLE_INTERVAL;
        }

        match self.pattern.next_frame() {
            Ok(frame) => streaming.send_frame(&frame),
            Err(e) => tracing::warn!("Failed to build synthetic frame: {}", e),
        }
        FRAME_INTERVAL
    }
}
