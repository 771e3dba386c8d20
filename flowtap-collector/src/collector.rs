//! One reporting cycle.
//!
//! `collect_once` runs a cycle end to end:
//! 1. Drain the event channel into the batch (bounded wait)
//! 2. Fold counter deltas into the batch total
//! 3. Forward the batch if it holds anything
//! 4. Clear the batch regardless of the outcome
//!
//! Read failures and forward failures are logged and do not end the cycle.

use std::time::Duration;

use flowtap_bpf::CaptureProgram;

use crate::forwarder::{ForwardError, ForwardReceipt, Forwarder, Transport};
use crate::logger::Logger;
use crate::session::{CaptureSession, PollSummary};
use crate::signal::ShutdownCheck;

/// What happened to the batch at the end of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Nothing to send.
    Skipped,
    Delivered(ForwardReceipt),
    Failed(ForwardError),
}

/// Result of a single cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub poll: PollSummary,
    /// Keys seen in the counter table this cycle.
    pub keys: usize,
    pub total_count: u64,
    pub events: usize,
    pub forward: ForwardOutcome,
}

/// Format `n` with comma thousands separators (`1234567` -> `1,234,567`).
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Run one cycle against an attached session.
///
/// Forward retries stop early once `shutdown` fires.
pub fn collect_once<P, L, T, H>(
    session: &mut CaptureSession<P, L>,
    forwarder: &Forwarder<T>,
    poll_timeout: Duration,
    cycle: u64,
    shutdown: &H,
) -> CycleReport
where
    P: CaptureProgram,
    L: Logger,
    T: Transport,
    H: ShutdownCheck + ?Sized,
{
    let poll = match session.poll(poll_timeout) {
        Ok(summary) => summary,
        Err(e) => {
            session.logger().error(&format!("event poll failed: {e}"));
            PollSummary::default()
        }
    };

    let keys = match session.poll_counters() {
        Ok(records) => records.len(),
        Err(e) => {
            session.logger().error(&format!("counter read failed: {e}"));
            0
        }
    };

    let batch = session.drain_batch();
    let total_count = batch.total_count;
    let events = batch.events.len();
    let logger = session.logger();

    logger.info(&format!(
        "cycle={cycle} events={events} rejected={} total={total_count} keys={keys}",
        poll.rejected
    ));
    if batch.overflowed > 0 {
        logger.warn(&format!(
            "batch bound reached: {} events dropped this cycle",
            batch.overflowed
        ));
    }

    let forward = if batch.is_empty() {
        ForwardOutcome::Skipped
    } else {
        logger.info(&format!("Total packets: {}", format_count(total_count)));
        match forwarder.send_until(batch, shutdown) {
            Ok(receipt) => {
                logger.debug(&format!(
                    "forwarded {} packets (count {}) to {} after {} attempt(s)",
                    receipt.packets,
                    receipt.count,
                    forwarder.url(),
                    receipt.attempts
                ));
                ForwardOutcome::Delivered(receipt)
            }
            Err(e) => {
                logger.error(&format!("failed to forward batch to {}: {e}", forwarder.url()));
                ForwardOutcome::Failed(e)
            }
        }
    };

    if !session.store().is_empty() {
        let logger = session.logger();
        logger.debug("cumulative packet counts:");
        for (key, count) in session.store().iter() {
            logger.debug(&format!("  {key}: {} packets", format_count(count)));
        }
    }

    CycleReport {
        poll,
        keys,
        total_count,
        events,
        forward,
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use flowtap_bpf::{encode, CaptureError, MockCapture};
    use flowtap_schema::{CollectorPayload, PacketEvent, Protocol};

    use super::*;
    use crate::forwarder::MockTransport;
    use crate::logger::{Level, MockLogger};
    use crate::session::SessionOptions;
    use crate::signal::NeverShutdown;
    use crate::sleeper::MockSleeper;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const TIMEOUT: Duration = Duration::from_millis(100);

    fn record(len: u32) -> Vec<u8> {
        encode(&PacketEvent {
            protocol: Protocol::Tcp,
            packet_type: 0,
            ip_protocol: 6,
            src_addr: SRC,
            dst_addr: Ipv4Addr::new(10, 0, 0, 2),
            src_port: 40000,
            dst_port: 80,
            packet_len: len,
            seq_num: 0,
            ack_num: 0,
            tcp_flags: 0x02,
            payload: Vec::new(),
        })
        .to_vec()
    }

    struct Harness {
        mock: MockCapture,
        logger: MockLogger,
        transport: MockTransport,
        session: CaptureSession<MockCapture, MockLogger>,
        forwarder: Forwarder<MockTransport>,
    }

    fn harness() -> Harness {
        let mock = MockCapture::new();
        let logger = MockLogger::new();
        let transport = MockTransport::new();
        let mut session =
            CaptureSession::new(mock.clone(), logger.clone(), SessionOptions::default());
        session.attach("eth0", "count_tcp_packets").expect("attach");
        let forwarder = Forwarder::new("http://collector/api", transport.clone())
            .with_sleeper(MockSleeper::new());
        Harness {
            mock,
            logger,
            transport,
            session,
            forwarder,
        }
    }

    // ===========================================
    // format_count
    // ===========================================

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1,000");
        assert_eq!(format_count(1_234_567), "1,234,567");
        assert_eq!(format_count(u64::MAX), "18,446,744,073,709,551,615");
    }

    // ===========================================
    // Cycles
    // ===========================================

    #[test]
    fn test_empty_cycle_sends_nothing() {
        let mut h = harness();
        let report = collect_once(&mut h.session, &h.forwarder, TIMEOUT, 1, &NeverShutdown);

        assert_eq!(report.forward, ForwardOutcome::Skipped);
        assert!(h.transport.requests().is_empty());
        assert!(h.logger.contains_at(Level::Info, "cycle=1 events=0 rejected=0 total=0 keys=0"));
    }

    #[test]
    fn test_cycle_forwards_events_and_total() {
        let mut h = harness();
        h.mock.push_records(vec![record(64), record(128), record(1500)]);
        h.mock.set_counter(SRC, 3);

        let report = collect_once(&mut h.session, &h.forwarder, TIMEOUT, 1, &NeverShutdown);
        assert_eq!(report.total_count, 3);
        assert_eq!(report.events, 3);
        assert!(matches!(report.forward, ForwardOutcome::Delivered(r) if r.status == 201));

        let requests = h.transport.requests();
        assert_eq!(requests.len(), 1);
        let payload = CollectorPayload::from_json(&requests[0].body).expect("json");
        assert_eq!(payload.count, 3);
        let lens: Vec<u32> = payload.packets.iter().map(|p| p.packet_len).collect();
        assert_eq!(lens, vec![64, 128, 1500]);
        assert!(h.logger.contains("Total packets: 3"));
    }

    #[test]
    fn test_counter_only_cycle_is_forwarded() {
        let mut h = harness();
        h.mock.set_counter(SRC, 2_500);

        let report = collect_once(&mut h.session, &h.forwarder, TIMEOUT, 1, &NeverShutdown);
        assert!(matches!(report.forward, ForwardOutcome::Delivered(_)));
        assert!(h.logger.contains("Total packets: 2,500"));
        assert!(h.logger.contains_at(Level::Debug, "10.0.0.1: 2,500 packets"));
    }

    #[test]
    fn test_failed_forward_clears_batch() {
        let mut h = harness();
        h.transport.respond(Ok(500));
        h.mock.push_records(vec![record(64)]);
        h.mock.set_counter(SRC, 1);

        let report = collect_once(&mut h.session, &h.forwarder, TIMEOUT, 1, &NeverShutdown);
        assert_eq!(report.forward, ForwardOutcome::Failed(ForwardError::HttpStatus(500)));
        assert!(h.logger.contains_at(Level::Error, "collector responded with HTTP 500"));

        // Nothing new arrives: the next cycle has nothing to send.
        let report = collect_once(&mut h.session, &h.forwarder, TIMEOUT, 2, &NeverShutdown);
        assert_eq!(report.forward, ForwardOutcome::Skipped);
        assert_eq!(report.events, 0);
        assert_eq!(h.transport.requests().len(), 1);
    }

    #[test]
    fn test_counter_read_failure_does_not_stop_cycle() {
        let mut h = harness();
        h.mock.push_records(vec![record(64)]);
        h.mock.fail_next_read(CaptureError::Read("busy".into()));

        let report = collect_once(&mut h.session, &h.forwarder, TIMEOUT, 1, &NeverShutdown);
        assert_eq!(report.keys, 0);
        assert_eq!(report.events, 1);
        assert!(matches!(report.forward, ForwardOutcome::Delivered(_)));
        assert!(h.logger.contains_at(Level::Error, "counter read failed"));
    }

    #[test]
    fn test_deltas_across_cycles() {
        let mut h = harness();
        h.mock.set_counter(SRC, 5);
        assert_eq!(collect_once(&mut h.session, &h.forwarder, TIMEOUT, 1, &NeverShutdown).total_count, 5);

        h.mock.set_counter(SRC, 12);
        assert_eq!(collect_once(&mut h.session, &h.forwarder, TIMEOUT, 2, &NeverShutdown).total_count, 7);

        h.mock.set_counter(SRC, 12);
        let report = collect_once(&mut h.session, &h.forwarder, TIMEOUT, 3, &NeverShutdown);
        assert_eq!(report.total_count, 0);
        assert_eq!(report.forward, ForwardOutcome::Skipped);
    }
}
