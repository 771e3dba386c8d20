//! Delivery of report batches to the remote collector.
//!
//! A batch is serialized to the collector JSON contract and POSTed through a
//! `Transport`. Only HTTP 201 counts as delivered. With the default policy a
//! failed batch is dropped; `max_retries` enables exponential backoff for
//! failures that may be transient (timeouts, connection errors, 5xx).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowtap_schema::ReportBatch;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

use crate::signal::{NeverShutdown, ShutdownCheck};
use crate::sleeper::{sleep_unless_stopped, RealSleeper, Sleeper};

/// Status the collector answers with on success.
pub const STATUS_CREATED: u16 = 201;

/// Upper bound on a single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Errors from delivering one batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForwardError {
    #[error("request timed out")]
    Timeout,

    #[error("collector responded with HTTP {0}")]
    HttpStatus(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to encode batch: {0}")]
    Encode(String),
}

impl ForwardError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ForwardError::Timeout | ForwardError::Transport(_) => true,
            ForwardError::HttpStatus(status) => (500..600).contains(status),
            ForwardError::Encode(_) => false,
        }
    }
}

/// Outcome of a delivered batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardReceipt {
    pub status: u16,
    pub count: u64,
    pub packets: usize,
    pub attempts: u32,
}

/// One HTTP exchange with the collector.
///
/// Returns the response status, or `Timeout` / `Transport` when no response
/// arrived.
pub trait Transport {
    fn post_json(&self, url: &str, body: &[u8]) -> Result<u16, ForwardError>;
}

/// Blocking `reqwest` transport. Every request is bounded by the client
/// timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForwardError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn post_json(&self, url: &str, body: &[u8]) -> Result<u16, ForwardError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ForwardError::Timeout
                } else {
                    ForwardError::Transport(e.to_string())
                }
            })?;
        Ok(response.status().as_u16())
    }
}

/// Retry policy. `max_retries = 0` sends each batch exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `MAX_BACKOFF`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Sends report batches to one collector URL.
pub struct Forwarder<T: Transport> {
    url: String,
    transport: T,
    retry: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
}

impl<T: Transport> Forwarder<T> {
    pub fn new(url: impl Into<String>, transport: T) -> Self {
        Self {
            url: url.into(),
            transport,
            retry: RetryPolicy::default(),
            sleeper: Box::new(RealSleeper),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver `batch`. The batch is consumed whatever the outcome.
    pub fn send(&self, batch: ReportBatch) -> Result<ForwardReceipt, ForwardError> {
        self.send_until(batch, &NeverShutdown)
    }

    /// `send`, abandoning retries once `shutdown` fires. Backoff sleeps are
    /// sliced like the inter-cycle sleep; on shutdown the last error is
    /// returned without another attempt.
    pub fn send_until<H>(
        &self,
        batch: ReportBatch,
        shutdown: &H,
    ) -> Result<ForwardReceipt, ForwardError>
    where
        H: ShutdownCheck + ?Sized,
    {
        let body = batch
            .to_payload()
            .to_json_bytes()
            .map_err(|e| ForwardError::Encode(e.to_string()))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.transport.post_json(&self.url, &body) {
                Ok(STATUS_CREATED) => {
                    return Ok(ForwardReceipt {
                        status: STATUS_CREATED,
                        count: batch.total_count,
                        packets: batch.events.len(),
                        attempts: attempt,
                    })
                }
                Ok(status) => ForwardError::HttpStatus(status),
                Err(e) => e,
            };

            if attempt > self.retry.max_retries || !result.is_transient() {
                return Err(result);
            }
            let delay = self.retry.backoff_delay(attempt);
            if !sleep_unless_stopped(&*self.sleeper, delay, shutdown) {
                return Err(result);
            }
        }
    }
}

/// A request seen by `MockTransport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockTransportState {
    responses: VecDeque<Result<u16, ForwardError>>,
    requests: Vec<RecordedRequest>,
}

/// Scripted transport for testing. Answers 201 once the script runs out.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next unanswered request.
    pub fn respond(&self, response: Result<u16, ForwardError>) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .responses
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .requests
            .clone()
    }
}

impl Transport for MockTransport {
    fn post_json(&self, url: &str, body: &[u8]) -> Result<u16, ForwardError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.requests.push(RecordedRequest {
            url: url.to_string(),
            body: body.to_vec(),
        });
        state.responses.pop_front().unwrap_or(Ok(STATUS_CREATED))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use flowtap_schema::{CollectorPayload, PacketEvent, Protocol};

    use super::*;
    use crate::signal::{AlwaysShutdown, ShutdownAfter};
    use crate::sleeper::MockSleeper;

    const URL: &str = "http://collector.local/api/packets";

    fn batch(total: u64, events: usize) -> ReportBatch {
        let event = PacketEvent {
            protocol: Protocol::Tcp,
            packet_type: 0,
            ip_protocol: 6,
            src_addr: Ipv4Addr::new(10, 0, 0, 1),
            dst_addr: Ipv4Addr::new(10, 0, 0, 2),
            src_port: 40000,
            dst_port: 80,
            packet_len: 64,
            seq_num: 1,
            ack_num: 2,
            tcp_flags: 0x10,
            payload: Vec::new(),
        };
        ReportBatch {
            total_count: total,
            events: vec![event; events],
            overflowed: 0,
        }
    }

    fn forwarder(transport: &MockTransport) -> Forwarder<MockTransport> {
        Forwarder::new(URL, transport.clone()).with_sleeper(MockSleeper::new())
    }

    // ===========================================
    // Single attempt
    // ===========================================

    #[test]
    fn test_send_success_on_201() {
        let transport = MockTransport::new();
        let receipt = forwarder(&transport).send(batch(3, 2)).expect("send");

        assert_eq!(
            receipt,
            ForwardReceipt {
                status: 201,
                count: 3,
                packets: 2,
                attempts: 1
            }
        );

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, URL);
        let payload = CollectorPayload::from_json(&requests[0].body).expect("json");
        assert_eq!(payload.count, 3);
        assert_eq!(payload.packets.len(), 2);
    }

    #[test]
    fn test_send_200_is_not_success() {
        let transport = MockTransport::new();
        transport.respond(Ok(200));
        let err = forwarder(&transport).send(batch(1, 0)).unwrap_err();
        assert_eq!(err, ForwardError::HttpStatus(200));
    }

    #[test]
    fn test_send_500_without_retry() {
        let transport = MockTransport::new();
        transport.respond(Ok(500));
        let err = forwarder(&transport).send(batch(1, 1)).unwrap_err();

        assert_eq!(err, ForwardError::HttpStatus(500));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_send_timeout() {
        let transport = MockTransport::new();
        transport.respond(Err(ForwardError::Timeout));
        let err = forwarder(&transport).send(batch(1, 0)).unwrap_err();
        assert_eq!(err, ForwardError::Timeout);
    }

    // ===========================================
    // Retry policy
    // ===========================================

    #[test]
    fn test_retry_until_success() {
        let transport = MockTransport::new();
        transport.respond(Ok(503));
        transport.respond(Err(ForwardError::Transport("connection refused".into())));

        let sleeper = MockSleeper::new();
        let fwd = Forwarder::new(URL, transport.clone())
            .with_retry(RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(100),
            })
            .with_sleeper(sleeper.clone());

        let receipt = fwd.send(batch(1, 0)).expect("send");
        assert_eq!(receipt.attempts, 3);
        // 100ms then 200ms, slept in 100ms slices.
        assert_eq!(sleeper.calls(), vec![Duration::from_millis(100); 3]);
        assert_eq!(sleeper.total(), Duration::from_millis(300));
    }

    #[test]
    fn test_shutdown_abandons_backoff() {
        let transport = MockTransport::new();
        for _ in 0..6 {
            transport.respond(Err(ForwardError::Timeout));
        }
        let sleeper = MockSleeper::new();
        let fwd = Forwarder::new(URL, transport.clone())
            .with_retry(RetryPolicy {
                max_retries: 5,
                base_delay: Duration::from_secs(10),
            })
            .with_sleeper(sleeper.clone());

        // One slice of the first backoff, then shutdown.
        let err = fwd
            .send_until(batch(1, 0), &ShutdownAfter::new(1))
            .unwrap_err();

        assert_eq!(err, ForwardError::Timeout);
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(sleeper.total(), Duration::from_millis(100));
    }

    #[test]
    fn test_shutdown_already_set_sends_once() {
        let transport = MockTransport::new();
        transport.respond(Ok(503));
        let sleeper = MockSleeper::new();
        let fwd = Forwarder::new(URL, transport.clone())
            .with_retry(RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(100),
            })
            .with_sleeper(sleeper.clone());

        let err = fwd.send_until(batch(1, 0), &AlwaysShutdown).unwrap_err();
        assert_eq!(err, ForwardError::HttpStatus(503));
        assert_eq!(transport.requests().len(), 1);
        assert!(sleeper.calls().is_empty());
    }

    #[test]
    fn test_retry_gives_up_after_max() {
        let transport = MockTransport::new();
        for _ in 0..5 {
            transport.respond(Err(ForwardError::Timeout));
        }
        let fwd = forwarder(&transport).with_retry(RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
        });

        assert_eq!(fwd.send(batch(1, 0)).unwrap_err(), ForwardError::Timeout);
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn test_client_error_not_retried() {
        let transport = MockTransport::new();
        transport.respond(Ok(400));
        let fwd = forwarder(&transport).with_retry(RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(10),
        });

        assert_eq!(fwd.send(batch(1, 0)).unwrap_err(), ForwardError::HttpStatus(400));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(10), Duration::from_millis(51_200).min(MAX_BACKOFF));
        assert_eq!(policy.backoff_delay(40), MAX_BACKOFF);
    }

    #[test]
    fn test_transient_classification() {
        assert!(ForwardError::Timeout.is_transient());
        assert!(ForwardError::Transport("reset".into()).is_transient());
        assert!(ForwardError::HttpStatus(500).is_transient());
        assert!(ForwardError::HttpStatus(599).is_transient());
        assert!(!ForwardError::HttpStatus(404).is_transient());
        assert!(!ForwardError::Encode("bad".into()).is_transient());
    }

    #[test]
    fn test_forward_error_display() {
        assert_eq!(
            ForwardError::HttpStatus(500).to_string(),
            "collector responded with HTTP 500"
        );
        assert_eq!(ForwardError::Timeout.to_string(), "request timed out");
    }

    // ===========================================
    // HttpTransport
    // ===========================================

    #[test]
    fn test_http_transport_connection_refused_is_transport_error() {
        // Port 9 on loopback is closed in test environments.
        let transport = HttpTransport::new(Duration::from_millis(500)).expect("client");
        let err = transport
            .post_json("http://127.0.0.1:9/api/packets", b"{}")
            .unwrap_err();
        assert!(matches!(
            err,
            ForwardError::Transport(_) | ForwardError::Timeout
        ));
    }
}
