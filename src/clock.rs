//! Time sources.
//!
//! Components that depend on time (recording window, throttle refill) take a
//! `Clock` at construction so tests and simulated runs can drive time by hand.

use chrono::{Local, NaiveTime};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub trait Clock: Send {
    /// Monotonic instant, used for elapsed-time measurements.
    fn now(&self) -> Instant;

    /// Local wall-clock time of day.
    fn time_of_day(&self) -> NaiveTime;
}

/// Real system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn time_of_day(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Debug)]
struct ManualState {
    base: Instant,
    elapsed: Duration,
    /// Wall-clock reading at `day_origin_elapsed`.
    day_origin: NaiveTime,
    day_origin_elapsed: Duration,
}

impl ManualClock {
    /// A clock reading `time_of_day` on the wall and an arbitrary instant.
    pub fn new(time_of_day: NaiveTime) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                base: Instant::now(),
                elapsed: Duration::ZERO,
                day_origin: time_of_day,
                day_origin_elapsed: Duration::ZERO,
            })),
        }
    }

    /// Move both the monotonic and wall-clock readings forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.elapsed += by;
    }

    /// Jump the wall clock to `time_of_day` without moving the monotonic clock.
    pub fn set_time_of_day(&self, time_of_day: NaiveTime) {
        let mut state = self.lock();
        state.day_origin = time_of_day;
        state.day_origin_elapsed = state.elapsed;
    }

    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        // Plain data: still consistent after a panic elsewhere.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(NaiveTime::MIN)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let state = self.lock();
        state.base + state.elapsed
    }

    fn time_of_day(&self) -> NaiveTime {
        let state = self.lock();
        let since_origin = state.elapsed.saturating_sub(state.day_origin_elapsed);
        let since_origin =
            chrono::Duration::from_std(since_origin).unwrap_or_else(|_| chrono::Duration::zero());
        state.day_origin.overflowing_add_signed(since_origin).0
    }
}
