//! flowtap collector.
//!
//! Userspace side of flowtap: attaches the XDP capture program, drains its
//! event channel and counter table each cycle, and forwards the resulting
//! batch to an HTTP collector.

pub mod batch;
pub mod cli;
pub mod collector;
pub mod commands;
pub mod config;
pub mod counter_store;
pub mod diagnostic;
pub mod exit;
pub mod forwarder;
pub mod logger;
pub mod session;
pub mod signal;
pub mod sleeper;

pub use batch::{BatchBuilder, DEFAULT_MAX_EVENTS};
pub use cli::{default_interface, parse_from, parse_route_table, resolve_interface, Cli, Command, RunArgs};
pub use collector::{collect_once, format_count, CycleReport, ForwardOutcome};
pub use commands::{execute_check, execute_run, render_settings, CommandError, CommandResult, RunSummary};
pub use config::{Config, ConfigError, Settings, DEFAULT_CONFIG_PATH};
pub use counter_store::{CounterAnomaly, CounterStore};
pub use diagnostic::DiagnosticTap;
pub use forwarder::{
    ForwardError, ForwardReceipt, Forwarder, HttpTransport, MockTransport, RecordedRequest,
    RetryPolicy, Transport,
};
pub use logger::{init_tracing, Level, Logger, MockLogger, TracingLogger, Verbosity};
pub use session::{CaptureSession, PollSummary, SessionOptions, SessionState};
pub use signal::{AlwaysShutdown, NeverShutdown, ShutdownAfter, ShutdownCheck, ShutdownFlag};
pub use sleeper::{sleep_unless_stopped, MockSleeper, RealSleeper, Sleeper};
