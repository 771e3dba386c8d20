//! Daemon configuration.
//!
//! The TOML file is parsed into `Config` (every field optional or
//! defaulted), command-line overrides are applied, and `Config::resolve`
//! validates the result into an immutable `Settings`.
//!
//! ```toml
//! [capture]
//! interface = "eth0"
//! program = "/usr/lib/flowtap/http_filter.bpf.o"
//! function = "count_tcp_packets"
//!
//! [collector]
//! url = "http://dashboard:8000/api/packets/"
//!
//! [report]
//! interval_sec = 50
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::batch::DEFAULT_MAX_EVENTS;
use crate::cli::{resolve_interface, RunArgs};

/// Default path of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/flowtap/flowtap.toml";

/// XDP entry point in the stock capture program.
pub const DEFAULT_FUNCTION: &str = "count_tcp_packets";

/// Default kernel trace stream.
pub const DEFAULT_TRACE_PIPE: &str = "/sys/kernel/debug/tracing/trace_pipe";

fn default_function() -> String {
    DEFAULT_FUNCTION.into()
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_interval_sec() -> u64 {
    50
}

fn default_max_events() -> usize {
    DEFAULT_MAX_EVENTS
}

fn default_trace_pipe_path() -> PathBuf {
    PathBuf::from(DEFAULT_TRACE_PIPE)
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required setting '{0}'")]
    Missing(&'static str),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("no network interface configured and no default route found")]
    NoInterface,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureSection {
    /// Interface to attach to. Defaults to the default-route interface.
    #[serde(default)]
    pub interface: Option<String>,
    /// Compiled BPF object file.
    #[serde(default)]
    pub program: Option<PathBuf>,
    /// Name of the XDP function inside the object.
    #[serde(default = "default_function")]
    pub function: String,
    /// Bounded wait for event records each cycle.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            interface: None,
            program: None,
            function: default_function(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_timeout_ms(),
            max_retries: 0,
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportSection {
    #[serde(default = "default_interval_sec")]
    pub interval_sec: u64,
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// Evict counter keys idle for this many cycles (0 = never).
    #[serde(default)]
    pub idle_cycles: u64,
    /// Clear the kernel counter table after every read.
    #[serde(default)]
    pub clear_counters_after_read: bool,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            interval_sec: default_interval_sec(),
            max_events: default_max_events(),
            idle_cycles: 0,
            clear_counters_after_read: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticsSection {
    #[serde(default)]
    pub trace_pipe: bool,
    #[serde(default = "default_trace_pipe_path")]
    pub trace_pipe_path: PathBuf,
}

impl Default for DiagnosticsSection {
    fn default() -> Self {
        Self {
            trace_pipe: false,
            trace_pipe_path: default_trace_pipe_path(),
        }
    }
}

/// Configuration as written in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureSection,
    #[serde(default)]
    pub collector: CollectorSection,
    #[serde(default)]
    pub report: ReportSection,
    #[serde(default)]
    pub diagnostics: DiagnosticsSection,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load the file named by `args`, if any, and layer the CLI flags on top.
    ///
    /// Without `--config`, the default path is used when it exists and an
    /// all-default configuration otherwise.
    pub fn from_args(args: &RunArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        config.apply_overrides(args);
        Ok(config)
    }

    /// Command-line flags win over file values.
    pub fn apply_overrides(&mut self, args: &RunArgs) {
        if let Some(iface) = &args.iface {
            self.capture.interface = Some(iface.clone());
        }
        if let Some(program) = &args.program {
            self.capture.program = Some(program.clone());
        }
        if let Some(function) = &args.function {
            self.capture.function = function.clone();
        }
        if let Some(url) = &args.collector_url {
            self.collector.url = Some(url.clone());
        }
        if let Some(interval) = args.interval_sec {
            self.report.interval_sec = interval;
        }
    }

    /// Validate and fill in the interface from the default route.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        self.resolve_with(resolve_interface)
    }

    /// `resolve` with an injectable interface lookup.
    pub fn resolve_with<F>(&self, lookup: F) -> Result<Settings, ConfigError>
    where
        F: FnOnce(Option<&str>) -> Option<String>,
    {
        let program = self
            .capture
            .program
            .clone()
            .ok_or(ConfigError::Missing("capture.program"))?;

        if self.capture.function.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "capture.function",
                reason: "must not be empty".into(),
            });
        }

        let url = self
            .collector
            .url
            .clone()
            .ok_or(ConfigError::Missing("collector.url"))?;
        validate_url(&url)?;

        if self.report.interval_sec == 0 {
            return Err(ConfigError::Invalid {
                field: "report.interval_sec",
                reason: "must be at least 1".into(),
            });
        }
        if self.report.max_events == 0 {
            return Err(ConfigError::Invalid {
                field: "report.max_events",
                reason: "must be at least 1".into(),
            });
        }
        if self.collector.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "collector.timeout_ms",
                reason: "must be at least 1".into(),
            });
        }

        let interface =
            lookup(self.capture.interface.as_deref()).ok_or(ConfigError::NoInterface)?;

        Ok(Settings {
            interface,
            program,
            function: self.capture.function.clone(),
            poll_timeout: Duration::from_millis(self.capture.poll_timeout_ms),
            collector_url: url,
            request_timeout: Duration::from_millis(self.collector.timeout_ms),
            max_retries: self.collector.max_retries,
            retry_base_delay: Duration::from_millis(self.collector.retry_base_delay_ms),
            interval: Duration::from_secs(self.report.interval_sec),
            max_events: self.report.max_events,
            idle_cycles: self.report.idle_cycles,
            clear_counters_after_read: self.report.clear_counters_after_read,
            trace_pipe: self
                .diagnostics
                .trace_pipe
                .then(|| self.diagnostics.trace_pipe_path.clone()),
        })
    }
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| ConfigError::Invalid {
        field: "collector.url",
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid {
            field: "collector.url",
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// Validated runtime configuration. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub interface: String,
    pub program: PathBuf,
    pub function: String,
    pub poll_timeout: Duration,
    pub collector_url: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub interval: Duration,
    pub max_events: usize,
    pub idle_cycles: u64,
    pub clear_counters_after_read: bool,
    /// Trace stream to tap, when diagnostics are enabled.
    pub trace_pipe: Option<PathBuf>,
}
