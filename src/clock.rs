//! Per-sweep monotonic clock.

use std::time::{Duration, Instant};

/// Monotonic clock reporting seconds since the start of one sweep.
///
/// Every worker of a sweep receives a copy of the same clock so that their
/// timestamps share one epoch and can be compared by the fusion engine.
#[derive(Debug, Clone, Copy)]
pub struct SweepClock {
    epoch: Instant,
}

impl SweepClock {
    /// Create a clock whose epoch is now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Seconds elapsed since the epoch.
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Elapsed time since the epoch as a `Duration`.
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }
}

impl Default for SweepClock {
    fn default() -> Self {
        Self::new()
    }
}
