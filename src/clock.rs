//! # Clock Module
//!
//! Time source shared by the serial state machine, the block store and the
//! manager loops. Production code uses [`SystemClock`]; tests drive a
//! [`ManualClock`] so that backoff and rotation can be checked without
//! sleeping.

use chrono::{Local, NaiveDateTime};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Monotonic and wall-clock time plus a blocking sleep.
pub trait Clock: Send + Sync {
    /// Monotonic instant, used for retry scheduling.
    fn now(&self) -> Instant;

    /// Local wall-clock time, used for timestamps and block boundaries.
    fn wall(&self) -> NaiveDateTime;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Real time from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Simulated clock. `sleep` advances time instead of blocking.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    state: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    elapsed: Duration,
    wall: NaiveDateTime,
}

impl ManualClock {
    /// Creates a clock whose wall time starts at `wall`.
    #[must_use]
    pub fn new(wall: NaiveDateTime) -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                wall,
            }),
        }
    }

    /// Moves both the monotonic and the wall clock forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.elapsed += by;
        state.wall += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }

    /// Jumps the wall clock to `wall` without touching the monotonic clock.
    pub fn set_wall(&self, wall: NaiveDateTime) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).wall = wall;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.state.lock().unwrap_or_else(PoisonError::into_inner).elapsed
    }

    fn wall(&self) -> NaiveDateTime {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).wall
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_manual_sleep_advances_both_clocks() {
        let clock = ManualClock::new(at(14, 7, 0));
        let before = clock.now();

        clock.sleep(Duration::from_secs(90));

        assert_eq!(clock.now() - before, Duration::from_secs(90));
        assert_eq!(clock.wall(), at(14, 8, 30));
    }

    #[test]
    fn test_set_wall_keeps_monotonic_time() {
        let clock = ManualClock::new(at(14, 7, 0));
        let before = clock.now();

        clock.set_wall(at(15, 0, 0));

        assert_eq!(clock.now(), before);
        assert_eq!(clock.wall(), at(15, 0, 0));
    }
}
