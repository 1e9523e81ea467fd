//! Soft real-time tick pacing.
//!
//! [`Pacer::wait`] sleeps until the next tick deadline.  When processing ran
//! past the deadline it returns immediately, counts an overrun, and re-anchors
//! the schedule at the current instant so a single slow tick does not cause a
//! burst of catch-up ticks.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Pacer {
    period: Duration,
    next: Instant,
    overruns: u64,
}

impl Pacer {
    /// Pace at one tick every `dt` seconds.
    pub fn new(dt: f64) -> Self {
        let period = Duration::from_secs_f64(dt.max(0.0));
        Self {
            period,
            next: Instant::now() + period,
            overruns: 0,
        }
    }

    /// Restart the schedule from now.
    pub fn reset(&mut self) {
        self.next = Instant::now() + self.period;
    }

    /// Block until the current tick's deadline.  Returns `true` if the
    /// deadline had already passed.
    pub fn wait(&mut self) -> bool {
        let now = Instant::now();
        if now < self.next {
            std::thread::sleep(self.next - now);
            self.next += self.period;
            false
        } else {
            self.overruns += 1;
            self.next = now + self.period;
            true
        }
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}
