//! Per-cycle accumulation of decoded events and the counter total.

use flowtap_schema::{PacketEvent, ReportBatch};

/// Default bound on events kept per cycle.
pub const DEFAULT_MAX_EVENTS: usize = 1024;

/// Accumulates one cycle's events and traffic total.
///
/// Events past `max_events` are dropped and counted; the count is reported
/// in the drained batch's `overflowed` field.
#[derive(Debug)]
pub struct BatchBuilder {
    max_events: usize,
    batch: ReportBatch,
}

impl Default for BatchBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENTS)
    }
}

impl BatchBuilder {
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events,
            batch: ReportBatch::default(),
        }
    }

    /// Append `event`. Returns `false` if it was dropped by the bound.
    pub fn add_event(&mut self, event: PacketEvent) -> bool {
        if self.batch.events.len() >= self.max_events {
            self.batch.overflowed += 1;
            return false;
        }
        self.batch.events.push(event);
        true
    }

    /// Add `n` to the cycle's traffic total.
    pub fn add_count(&mut self, n: u64) {
        self.batch.total_count = self.batch.total_count.saturating_add(n);
    }

    pub fn current_total(&self) -> u64 {
        self.batch.total_count
    }

    /// Events accumulated since the last drain.
    pub fn len(&self) -> usize {
        self.batch.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn overflowed(&self) -> u64 {
        self.batch.overflowed
    }

    /// Take everything accumulated, leaving the builder empty.
    pub fn drain(&mut self) -> ReportBatch {
        std::mem::take(&mut self.batch)
    }
}
