use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Decides whether a VU may begin another iteration: a shared countdown in
/// iteration mode, a deadline in duration mode.
#[derive(Debug)]
pub struct IterationGate {
    counter: AtomicU64,
    iterations: Option<u64>,
    duration: Option<Duration>,
    deadline: OnceLock<Instant>,
}

impl IterationGate {
    pub fn new(iterations: Option<u64>, duration: Option<Duration>) -> Self {
        Self {
            counter: AtomicU64::new(0),
            iterations,
            duration,
            deadline: OnceLock::new(),
        }
    }

    pub fn start_at(&self, started: Instant) {
        if let Some(duration) = self.duration {
            let _ = self.deadline.set(started + duration);
        }
    }

    /// True when another iteration may start. Hot path avoids timekeeping
    /// unless duration mode is active.
    pub fn next(&self) -> bool {
        if self.duration.is_some() {
            let now = Instant::now();
            if self.deadline.get().is_none() {
                self.start_at(now);
            }
            if let Some(deadline) = self.deadline.get() {
                if now >= *deadline {
                    return false;
                }
            }
        }

        if let Some(total) = self.iterations {
            let index = self.counter.fetch_add(1, Ordering::Relaxed);
            if index >= total {
                return false;
            }
        } else if self.duration.is_none() {
            // Neither bound set: run exactly once.
            let index = self.counter.fetch_add(1, Ordering::Relaxed);
            if index > 0 {
                return false;
            }
        }

        true
    }
}
