//! Session timing utilities

use std::time::{Duration, Instant};

/// Monotonic session clock with whole-second resolution.
///
/// Far blocks are stamped with uptime seconds, so eviction thresholds
/// are plain integer comparisons.
#[derive(Debug, Clone, Copy)]
pub struct Uptime {
    start: Instant,
}

impl Uptime {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    /// Seconds since the clock was created
    pub fn secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    /// Time since the clock was created
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Uptime {
    fn default() -> Self {
        Self::new()
    }
}

/// Measures a single unit of work for debug logging
pub struct PassTimer {
    started: Instant,
}

impl PassTimer {
    pub fn start() -> Self {
        Self { started: Instant::now() }
    }

    /// Elapsed time in milliseconds
    pub fn ms(&self) -> f32 {
        self.started.elapsed().as_secs_f32() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_starts_at_zero() {
        let uptime = Uptime::new();
        assert_eq!(uptime.secs(), 0);
    }

    #[test]
    fn test_pass_timer_non_negative() {
        let timer = PassTimer::start();
        assert!(timer.ms() >= 0.0);
    }
}
