//! Run command orchestration.
//!
//! Attaches the capture program, then runs reporting cycles until shutdown
//! is requested, sleeping `interval` between cycles. The program is
//! detached exactly once on the way out.

use flowtap_bpf::CaptureProgram;

use crate::collector::{collect_once, ForwardOutcome};
use crate::config::Settings;
use crate::forwarder::{Forwarder, RetryPolicy, Transport};
use crate::logger::Logger;
use crate::session::{CaptureSession, SessionOptions};
use crate::signal::ShutdownCheck;
use crate::sleeper::{sleep_unless_stopped, Sleeper};

use super::CommandResult;

/// Totals over the daemon's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub events: u64,
    pub delivered: u64,
    pub failed: u64,
    pub rejected: u64,
}

/// Execute the run command.
pub fn execute_run<P, L, T, S, H>(
    settings: &Settings,
    program: P,
    transport: T,
    logger: L,
    sleeper: S,
    shutdown: &H,
) -> CommandResult<RunSummary>
where
    P: CaptureProgram,
    L: Logger,
    T: Transport,
    S: Sleeper + Clone + 'static,
    H: ShutdownCheck + ?Sized,
{
    let forwarder = Forwarder::new(settings.collector_url.clone(), transport)
        .with_retry(RetryPolicy {
            max_retries: settings.max_retries,
            base_delay: settings.retry_base_delay,
        })
        .with_sleeper(sleeper.clone());

    let options = SessionOptions {
        max_events: settings.max_events,
        idle_cycles: settings.idle_cycles,
        clear_counters_after_read: settings.clear_counters_after_read,
    };
    let mut session = CaptureSession::new(program, logger, options);
    session.attach(&settings.interface, &settings.function)?;

    session.logger().info(&format!(
        "forwarding to {} every {}s",
        settings.collector_url,
        settings.interval.as_secs()
    ));

    let mut summary = RunSummary::default();
    while !shutdown.should_stop() {
        summary.cycles += 1;
        let report = collect_once(
            &mut session,
            &forwarder,
            settings.poll_timeout,
            summary.cycles,
            shutdown,
        );

        summary.events += report.events as u64;
        summary.rejected += report.poll.rejected as u64;
        match report.forward {
            ForwardOutcome::Delivered(_) => summary.delivered += 1,
            ForwardOutcome::Failed(_) => summary.failed += 1,
            ForwardOutcome::Skipped => {}
        }

        if !sleep_unless_stopped(&sleeper, settings.interval, shutdown) {
            break;
        }
    }

    session.logger().info("shutdown requested, detaching");
    session.detach()?;

    Ok(summary)
}
