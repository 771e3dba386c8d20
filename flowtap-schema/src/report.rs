//! Counter deltas, report batches and the collector wire format.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::event::{PacketEvent, Protocol};

/// Change in one cumulative counter between two observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterDelta {
    /// Counter moved forward (or stayed put) by this amount.
    Advanced(u64),
    /// Counter went backwards: the producer reset or wrapped it.
    Reset { previous: u64, current: u64 },
}

impl CounterDelta {
    /// Signed difference `current - previous`.
    pub fn signed(&self) -> i128 {
        match *self {
            CounterDelta::Advanced(n) => n as i128,
            CounterDelta::Reset { previous, current } => current as i128 - previous as i128,
        }
    }

    pub fn is_anomaly(&self) -> bool {
        matches!(self, CounterDelta::Reset { .. })
    }

    /// Traffic attributable to the interval; anomalies contribute nothing.
    pub fn traffic(&self) -> u64 {
        match *self {
            CounterDelta::Advanced(n) => n,
            CounterDelta::Reset { .. } => 0,
        }
    }
}

/// Delta observed for one key in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaRecord {
    pub key: Ipv4Addr,
    pub delta: CounterDelta,
}

/// Unit of delivery to the collector: one reporting cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportBatch {
    pub total_count: u64,
    /// Events in decode order.
    pub events: Vec<PacketEvent>,
    /// Events dropped because the batch hit its size bound. Not sent.
    pub overflowed: u64,
}

impl ReportBatch {
    /// Nothing worth sending: no events and no counted traffic.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.total_count == 0
    }

    pub fn to_payload(&self) -> CollectorPayload {
        CollectorPayload {
            count: self.total_count,
            packets: self.events.iter().map(PacketRecord::from).collect(),
        }
    }
}

/// One packet entry in the collector payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub protocol: Protocol,
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    pub packet_len: u32,
    pub seq_num: u32,
    pub ack_num: u32,
    pub packet_type: u8,
    pub tcp_flags: u8,
}

impl From<&PacketEvent> for PacketRecord {
    fn from(event: &PacketEvent) -> Self {
        Self {
            protocol: event.protocol,
            src_ip: event.src_addr.to_string(),
            src_port: event.src_port,
            dst_ip: event.dst_addr.to_string(),
            dst_port: event.dst_port,
            packet_len: event.packet_len,
            seq_num: event.seq_num,
            ack_num: event.ack_num,
            packet_type: event.packet_type,
            tcp_flags: event.tcp_flags,
        }
    }
}

/// JSON body of `POST <collector-url>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorPayload {
    pub count: u64,
    pub packets: Vec<PacketRecord>,
}

impl CollectorPayload {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ReportError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(json: &[u8]) -> Result<Self, ReportError> {
        Ok(serde_json::from_slice(json)?)
    }
}

/// Errors from encoding or decoding collector payloads.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
