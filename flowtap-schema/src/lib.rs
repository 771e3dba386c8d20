//! flowtap data model
//!
//! Defines the decoded packet event, per-key counter deltas, the report batch
//! handed to the forwarder, and the JSON payload accepted by the collector.

mod event;
mod report;

pub use event::{PacketEvent, Protocol, TcpFlags, MAX_PAYLOAD_SAMPLE};
pub use report::{CollectorPayload, CounterDelta, DeltaRecord, PacketRecord, ReportBatch, ReportError};
