//! Capture session: owns the kernel binding and the per-cycle state.
//!
//! The session moves through `Detached -> Attached -> Polling -> Closed`.
//! It is the single writer of its `CounterStore` and `BatchBuilder`; all
//! mutation goes through `&mut self`.

use std::net::Ipv4Addr;
use std::time::Duration;

use flowtap_bpf::{decode, AttachError, CaptureError, CaptureProgram};
use flowtap_schema::{CounterDelta, DeltaRecord, ReportBatch};

use crate::batch::{BatchBuilder, DEFAULT_MAX_EVENTS};
use crate::counter_store::{CounterAnomaly, CounterStore};
use crate::logger::Logger;

/// Lifecycle state of a `CaptureSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Detached,
    Attached,
    Polling,
    Closed,
}

/// Per-session tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub max_events: usize,
    pub idle_cycles: u64,
    pub clear_counters_after_read: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            idle_cycles: 0,
            clear_counters_after_read: false,
        }
    }
}

/// Outcome of draining the event channel once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Records decoded and added to the batch.
    pub accepted: usize,
    /// Records that failed to decode.
    pub rejected: usize,
    /// Decoded records dropped by the batch bound.
    pub overflowed: usize,
    /// Records the kernel reported lost since the previous poll.
    pub lost: u64,
}

/// Owns one capture program binding.
pub struct CaptureSession<P: CaptureProgram, L: Logger> {
    program: P,
    logger: L,
    store: CounterStore,
    batch: BatchBuilder,
    options: SessionOptions,
    state: SessionState,
    interface: Option<String>,
    lost_seen: u64,
}

impl<P: CaptureProgram, L: Logger> CaptureSession<P, L> {
    pub fn new(program: P, logger: L, options: SessionOptions) -> Self {
        Self {
            program,
            logger,
            store: CounterStore::with_idle_eviction(options.idle_cycles),
            batch: BatchBuilder::new(options.max_events),
            options,
            state: SessionState::Detached,
            interface: None,
            lost_seen: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn logger(&self) -> &L {
        &self.logger
    }

    pub fn store(&self) -> &CounterStore {
        &self.store
    }

    /// Events waiting in the current batch.
    pub fn pending_events(&self) -> usize {
        self.batch.len()
    }

    /// Bind `program_name` to `interface`. Failure is fatal to the caller.
    pub fn attach(&mut self, interface: &str, program_name: &str) -> Result<(), AttachError> {
        match self.state {
            SessionState::Detached => {}
            SessionState::Attached | SessionState::Polling => {
                return Err(AttachError::AlreadyAttached(
                    self.interface.clone().unwrap_or_default(),
                ))
            }
            SessionState::Closed => return Err(AttachError::Closed),
        }

        self.program.attach(interface, program_name)?;
        // A fresh binding starts from a fresh kernel table.
        self.store.reset();
        self.lost_seen = self.program.lost_events();
        self.interface = Some(interface.to_string());
        self.state = SessionState::Attached;
        self.logger.info(&format!(
            "attached XDP program '{program_name}' to {interface}"
        ));
        Ok(())
    }

    fn ensure_attached(&self) -> Result<(), CaptureError> {
        match self.state {
            SessionState::Attached | SessionState::Polling => Ok(()),
            SessionState::Detached | SessionState::Closed => Err(CaptureError::NotAttached),
        }
    }

    /// Wait up to `timeout` for event records and move every decodable one
    /// into the current batch. Undecodable records are logged and skipped.
    pub fn poll(&mut self, timeout: Duration) -> Result<PollSummary, CaptureError> {
        self.ensure_attached()?;
        self.state = SessionState::Polling;

        let records = self.program.poll_records(timeout)?;
        let mut summary = PollSummary::default();

        for (index, raw) in records.iter().enumerate() {
            match decode(raw) {
                Ok(event) => {
                    self.logger.debug(&format!("packet: {}", event.describe()));
                    if !event.payload.is_empty() {
                        self.logger
                            .debug(&format!("payload: {:?}", event.payload_text()));
                    }
                    if self.batch.add_event(event) {
                        summary.accepted += 1;
                    } else {
                        summary.overflowed += 1;
                    }
                }
                Err(e) => {
                    summary.rejected += 1;
                    self.logger
                        .warn(&format!("dropping event record {index}: {e}"));
                }
            }
        }

        let lost_total = self.program.lost_events();
        summary.lost = lost_total.saturating_sub(self.lost_seen);
        self.lost_seen = lost_total;
        if summary.lost > 0 {
            self.logger.warn(&format!(
                "kernel dropped {} event records (perf buffer full)",
                summary.lost
            ));
        }

        Ok(summary)
    }

    /// Snapshot the counter table and fold it into the current batch.
    ///
    /// Keys are observed in address order. Advanced deltas add to the batch
    /// total; backwards counters are logged as anomalies and contribute
    /// nothing.
    pub fn poll_counters(&mut self) -> Result<Vec<DeltaRecord>, CaptureError> {
        self.ensure_attached()?;
        self.state = SessionState::Polling;

        let counters = self.program.read_counters()?;
        let mut keys: Vec<(Ipv4Addr, u64)> = counters.into_iter().collect();
        keys.sort_unstable_by_key(|(key, _)| *key);

        let mut records = Vec::with_capacity(keys.len());
        for (key, cumulative) in keys {
            let delta = self.store.observe(key, cumulative);
            match delta {
                CounterDelta::Advanced(n) => {
                    self.batch.add_count(n);
                    if n > 0 {
                        self.logger.info(&format!("{key}: +{n} packets"));
                    }
                }
                CounterDelta::Reset { previous, current } => {
                    let anomaly = CounterAnomaly {
                        key,
                        previous,
                        current,
                    };
                    self.logger.warn(&anomaly.to_string());
                }
            }
            records.push(DeltaRecord { key, delta });
        }

        // The deltas are already in the batch; a failed clear leaves the
        // kernel table and the store in step, so the next read still diffs
        // correctly.
        if self.options.clear_counters_after_read {
            match self.program.clear_counters() {
                Ok(()) => self.store.reset(),
                Err(e) => self
                    .logger
                    .warn(&format!("failed to clear counter table: {e}")),
            }
        }

        let evicted = self.store.end_cycle();
        if evicted > 0 {
            self.logger
                .debug(&format!("evicted {evicted} idle counter keys"));
        }

        Ok(records)
    }

    /// Take the current batch, leaving an empty one behind.
    pub fn drain_batch(&mut self) -> ReportBatch {
        self.batch.drain()
    }

    /// Unbind the program. Only the first call does anything.
    pub fn detach(&mut self) -> Result<(), CaptureError> {
        match self.state {
            SessionState::Attached | SessionState::Polling => {
                self.state = SessionState::Closed;
                let interface = self.interface.take().unwrap_or_default();
                self.program.detach()?;
                self.logger
                    .info(&format!("detached XDP program from {interface}"));
                Ok(())
            }
            SessionState::Detached | SessionState::Closed => Ok(()),
        }
    }
}

impl<P: CaptureProgram, L: Logger> Drop for CaptureSession<P, L> {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            self.logger.error(&format!("detach on drop failed: {e}"));
        }
    }
}
