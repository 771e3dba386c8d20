//! Sleep abstraction for testable loops.
//!
//! The driver loop and the forwarder's retry backoff sleep through
//! `Sleeper`, so tests run without real delays.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::signal::ShutdownCheck;

/// Granularity at which `sleep_unless_stopped` re-checks shutdown.
pub const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Trait for sleeping between cycles.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Real sleeper that uses `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealSleeper;

impl Sleeper for RealSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Mock sleeper for testing - records requests and returns immediately.
#[derive(Debug, Default, Clone)]
pub struct MockSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl MockSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every duration passed to `sleep`, in order.
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Sum of all requested sleeps.
    pub fn total(&self) -> Duration {
        self.calls().iter().sum()
    }
}

impl Sleeper for MockSleeper {
    fn sleep(&self, duration: Duration) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
    }
}

/// Sleep for `total` in `SLEEP_SLICE` steps, returning early once `shutdown`
/// fires. Returns `true` if the full duration elapsed.
pub fn sleep_unless_stopped<S, C>(sleeper: &S, total: Duration, shutdown: &C) -> bool
where
    S: Sleeper + ?Sized,
    C: ShutdownCheck + ?Sized,
{
    let mut remaining = total;
    while !remaining.is_zero() {
        if shutdown.should_stop() {
            return false;
        }
        let step = remaining.min(SLEEP_SLICE);
        sleeper.sleep(step);
        remaining -= step;
    }
    !shutdown.should_stop()
}
