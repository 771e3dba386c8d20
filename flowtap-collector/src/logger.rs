//! Logging abstraction for testable output.
//!
//! Components log through the `Logger` trait so tests can assert on what was
//! logged without installing a global subscriber. In the daemon the trait is
//! backed by `tracing` (`TracingLogger`), and `init_tracing` installs the
//! `tracing-subscriber` formatter.

use std::sync::{Arc, RwLock};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Target every daemon log line is emitted under.
pub const LOG_TARGET: &str = "flowtap";

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
}

/// Verbosity selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Normal output (info and above)
    Normal,
    /// Verbose output (-v flag; repeating it changes nothing)
    Verbose,
}

impl Verbosity {
    /// Create verbosity from CLI flag count.
    pub fn from_count(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            _ => Verbosity::Verbose,
        }
    }

    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub fn filter_directive(&self) -> String {
        let level = match self {
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        };
        format!("{LOG_TARGET}={level}")
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the verbosity flag. Calling this more
/// than once is harmless; later calls leave the first subscriber in place.
pub fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

/// Trait for logging output.
///
/// Implementations must be thread-safe; the diagnostic tap logs from its own
/// thread.
pub trait Logger: Send + Sync {
    /// Log a message at the given level.
    fn log(&self, level: Level, message: &str);

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }
}

impl<L: Logger + ?Sized> Logger for Arc<L> {
    fn log(&self, level: Level, message: &str) {
        (**self).log(level, message);
    }
}

/// Logger that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::Error => tracing::error!(target: LOG_TARGET, "{message}"),
            Level::Warn => tracing::warn!(target: LOG_TARGET, "{message}"),
            Level::Info => tracing::info!(target: LOG_TARGET, "{message}"),
            Level::Debug => tracing::debug!(target: LOG_TARGET, "{message}"),
        }
    }
}

/// Mock logger for testing that captures all messages.
#[derive(Debug, Clone, Default)]
pub struct MockLogger {
    messages: Arc<RwLock<Vec<LogEntry>>>,
}

/// A captured log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
}

impl MockLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all captured log entries.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.messages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Get all captured messages (just the text).
    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.message).collect()
    }

    /// Get messages at a specific level.
    pub fn messages_at_level(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.level == level)
            .map(|e| e.message)
            .collect()
    }

    /// Check if any message contains the given substring.
    pub fn contains(&self, substring: &str) -> bool {
        self.messages().iter().any(|m| m.contains(substring))
    }

    /// Check if any message at `level` contains the given substring.
    pub fn contains_at(&self, level: Level, substring: &str) -> bool {
        self.messages_at_level(level)
            .iter()
            .any(|m| m.contains(substring))
    }

    pub fn clear(&self) {
        self.messages
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn count(&self) -> usize {
        self.messages.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Logger for MockLogger {
    fn log(&self, level: Level, message: &str) {
        self.messages
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(LogEntry {
                level,
                message: message.to_string(),
            });
    }
}
