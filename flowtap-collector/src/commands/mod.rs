//! Command orchestration for CLI subcommands.
//!
//! Provides execute functions for:
//! - `run` - attach and forward until shutdown
//! - `check` - validate configuration

pub mod check;
pub mod run;

pub use check::{execute_check, render_settings};
pub use run::{execute_run, RunSummary};

use flowtap_bpf::{AttachError, CaptureError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::forwarder::ForwardError;

/// Errors from command execution.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("attach error: {0}")]
    Attach(#[from] AttachError),

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("collector client error: {0}")]
    Forwarder(#[from] ForwardError),

    #[error("{0} support not compiled in (rebuild with --features bpf)")]
    Unsupported(&'static str),
}

/// Result of command execution.
pub type CommandResult<T> = Result<T, CommandError>;
