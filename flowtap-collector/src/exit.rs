//! Exit codes for the flowtap binary.

use flowtap_bpf::AttachError;

use crate::commands::CommandError;
use crate::config::ConfigError;

/// Exit code constants.
pub mod codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// Invalid arguments.
    pub const INVALID_ARGS: i32 = 1;
    /// Configuration could not be loaded or validated.
    pub const CONFIG_ERROR: i32 = 2;
    /// Capture program could not be loaded or attached.
    pub const ATTACH_ERROR: i32 = 3;
    /// Capture program failed while running.
    pub const CAPTURE_ERROR: i32 = 4;
    /// No network interface found.
    pub const NO_INTERFACE: i32 = 7;
}

/// Map a CommandError to an exit code.
pub fn exit_code(error: &CommandError) -> i32 {
    match error {
        CommandError::Config(ConfigError::NoInterface) => codes::NO_INTERFACE,
        CommandError::Config(_) => codes::CONFIG_ERROR,
        CommandError::Attach(AttachError::InterfaceNotFound(_)) => codes::NO_INTERFACE,
        CommandError::Attach(_) => codes::ATTACH_ERROR,
        CommandError::Capture(_) => codes::CAPTURE_ERROR,
        CommandError::Forwarder(_) => codes::CONFIG_ERROR,
        CommandError::Unsupported(_) => codes::INVALID_ARGS,
    }
}
