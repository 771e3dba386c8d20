//! Signal handling for graceful shutdown.
//!
//! `ShutdownFlag` is set by SIGINT/SIGTERM (via `ctrlc` with the
//! `termination` feature). The driver loop and the diagnostic tap both poll
//! it; it is the only state they share.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Trait for checking shutdown status.
pub trait ShutdownCheck: Send + Sync {
    /// Returns true if shutdown has been requested.
    fn should_stop(&self) -> bool;
}

impl<S: ShutdownCheck + ?Sized> ShutdownCheck for Arc<S> {
    fn should_stop(&self) -> bool {
        (**self).should_stop()
    }
}

/// Flag that tracks whether shutdown has been requested.
#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Create a flag wired to SIGINT/SIGTERM.
    ///
    /// Only one process-wide handler can exist; if registration fails the
    /// flag still works when triggered manually.
    pub fn install() -> Self {
        let shutdown = Self::manual();
        let flag = Arc::clone(&shutdown.flag);

        let _ = ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        });

        shutdown
    }

    /// Create a shutdown flag without registering a handler.
    pub fn manual() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request shutdown.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl ShutdownCheck for ShutdownFlag {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Mock shutdown checker for testing - never signals shutdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverShutdown;

impl ShutdownCheck for NeverShutdown {
    fn should_stop(&self) -> bool {
        false
    }
}

/// Mock shutdown checker that always signals shutdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysShutdown;

impl ShutdownCheck for AlwaysShutdown {
    fn should_stop(&self) -> bool {
        true
    }
}

/// Mock shutdown checker that signals after `n` negative answers.
///
/// Lets a test run a loop for a fixed number of iterations.
#[derive(Debug)]
pub struct ShutdownAfter {
    remaining: AtomicUsize,
}

impl ShutdownAfter {
    pub fn new(checks: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(checks),
        }
    }
}

impl ShutdownCheck for ShutdownAfter {
    fn should_stop(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }
}
