//! Capture program capability interface.
//!
//! This module provides:
//! - `CaptureProgram` trait covering the kernel binding lifecycle
//!   (attach, drain event records, read/clear the counter table, detach)
//! - `AttachError` / `CaptureError` taxonomies
//! - `MockCapture`, a scripted implementation for testing

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;

/// Errors binding the capture program. All of them are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    #[error("failed to load BPF object: {0}")]
    Load(String),

    #[error("program '{0}' not found in BPF object")]
    ProgramNotFound(String),

    #[error("map '{0}' not found in BPF object")]
    MapNotFound(String),

    #[error("network interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("insufficient permissions (requires CAP_BPF, CAP_NET_ADMIN)")]
    InsufficientPermissions,

    #[error("failed to attach XDP program to interface '{interface}': {reason}")]
    Attach { interface: String, reason: String },

    #[error("capture program already attached to '{0}'")]
    AlreadyAttached(String),

    #[error("capture session is closed")]
    Closed,
}

/// Errors from an attached capture program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("capture program is not attached")]
    NotAttached,

    #[error("failed to read from capture program: {0}")]
    Read(String),

    #[error("failed to detach capture program: {0}")]
    Detach(String),
}

/// Operations the daemon needs from the kernel-resident capture program.
///
/// Implementations own the binding exclusively; callers must not share one
/// instance between sessions.
pub trait CaptureProgram {
    /// Bind `program` to `interface`.
    fn attach(&mut self, interface: &str, program: &str) -> Result<(), AttachError>;

    /// Wait up to `timeout` for event records and return every record that
    /// arrived, in arrival order.
    fn poll_records(&mut self, timeout: Duration) -> Result<Vec<Vec<u8>>, CaptureError>;

    /// Snapshot the cumulative per-source counter table.
    fn read_counters(&self) -> Result<HashMap<Ipv4Addr, u64>, CaptureError>;

    /// Remove every entry from the counter table.
    fn clear_counters(&mut self) -> Result<(), CaptureError>;

    /// Unbind the program and release kernel resources.
    fn detach(&mut self) -> Result<(), CaptureError>;

    /// Records the kernel dropped because the event channel was full.
    fn lost_events(&self) -> u64 {
        0
    }
}

impl<P: CaptureProgram + ?Sized> CaptureProgram for Box<P> {
    fn attach(&mut self, interface: &str, program: &str) -> Result<(), AttachError> {
        (**self).attach(interface, program)
    }

    fn poll_records(&mut self, timeout: Duration) -> Result<Vec<Vec<u8>>, CaptureError> {
        (**self).poll_records(timeout)
    }

    fn read_counters(&self) -> Result<HashMap<Ipv4Addr, u64>, CaptureError> {
        (**self).read_counters()
    }

    fn clear_counters(&mut self) -> Result<(), CaptureError> {
        (**self).clear_counters()
    }

    fn detach(&mut self) -> Result<(), CaptureError> {
        (**self).detach()
    }

    fn lost_events(&self) -> u64 {
        (**self).lost_events()
    }
}

#[derive(Debug, Default)]
struct MockState {
    attached_to: Option<(String, String)>,
    attach_error: Option<AttachError>,
    read_error: Option<CaptureError>,
    clear_error: Option<CaptureError>,
    pending: VecDeque<Vec<Vec<u8>>>,
    counters: HashMap<Ipv4Addr, u64>,
    attach_calls: usize,
    detach_calls: usize,
    clear_calls: usize,
    polls: Vec<Duration>,
}

/// Scripted capture program for testing.
///
/// Clones share state, so a test can hand one clone to a session and keep
/// another to inspect what the session did (including after the session is
/// dropped).
#[derive(Debug, Clone, Default)]
pub struct MockCapture {
    state: Arc<Mutex<MockState>>,
}

impl MockCapture {
    /// Create an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `attach` fail with `error`.
    pub fn fail_attach(&self, error: AttachError) {
        self.lock().attach_error = Some(error);
    }

    /// Make the next counter read fail with `error`.
    pub fn fail_next_read(&self, error: CaptureError) {
        self.lock().read_error = Some(error);
    }

    /// Make the next `clear_counters` fail with `error`, leaving the table
    /// untouched.
    pub fn fail_next_clear(&self, error: CaptureError) {
        self.lock().clear_error = Some(error);
    }

    /// Queue records to be returned by one future `poll_records` call.
    pub fn push_records(&self, records: Vec<Vec<u8>>) {
        self.lock().pending.push_back(records);
    }

    /// Set the cumulative counter for `src`.
    pub fn set_counter(&self, src: Ipv4Addr, value: u64) {
        self.lock().counters.insert(src, value);
    }

    /// Drop `src` from the counter table, as an LRU producer would.
    pub fn remove_counter(&self, src: Ipv4Addr) {
        self.lock().counters.remove(&src);
    }

    /// Interface and program of the current binding.
    pub fn attached_to(&self) -> Option<(String, String)> {
        self.lock().attached_to.clone()
    }

    pub fn attach_calls(&self) -> usize {
        self.lock().attach_calls
    }

    pub fn detach_calls(&self) -> usize {
        self.lock().detach_calls
    }

    pub fn clear_calls(&self) -> usize {
        self.lock().clear_calls
    }

    /// Timeouts passed to each `poll_records` call.
    pub fn polls(&self) -> Vec<Duration> {
        self.lock().polls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CaptureProgram for MockCapture {
    fn attach(&mut self, interface: &str, program: &str) -> Result<(), AttachError> {
        let mut state = self.lock();
        state.attach_calls += 1;
        if let Some(err) = state.attach_error.take() {
            return Err(err);
        }
        if let Some((current, _)) = &state.attached_to {
            return Err(AttachError::AlreadyAttached(current.clone()));
        }
        state.attached_to = Some((interface.to_string(), program.to_string()));
        Ok(())
    }

    fn poll_records(&mut self, timeout: Duration) -> Result<Vec<Vec<u8>>, CaptureError> {
        let mut state = self.lock();
        if state.attached_to.is_none() {
            return Err(CaptureError::NotAttached);
        }
        state.polls.push(timeout);
        Ok(state.pending.pop_front().unwrap_or_default())
    }

    fn read_counters(&self) -> Result<HashMap<Ipv4Addr, u64>, CaptureError> {
        let mut state = self.lock();
        if state.attached_to.is_none() {
            return Err(CaptureError::NotAttached);
        }
        if let Some(err) = state.read_error.take() {
            return Err(err);
        }
        Ok(state.counters.clone())
    }

    fn clear_counters(&mut self) -> Result<(), CaptureError> {
        let mut state = self.lock();
        if state.attached_to.is_none() {
            return Err(CaptureError::NotAttached);
        }
        state.clear_calls += 1;
        if let Some(err) = state.clear_error.take() {
            return Err(err);
        }
        state.counters.clear();
        Ok(())
    }

    fn detach(&mut self) -> Result<(), CaptureError> {
        let mut state = self.lock();
        state.detach_calls += 1;
        match state.attached_to.take() {
            Some(_) => Ok(()),
            None => Err(CaptureError::NotAttached),
        }
    }
}
