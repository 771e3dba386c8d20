//! CLI argument parsing for flowtap.
//!
//! The `flowtap` binary has two subcommands: `run` starts the daemon, and
//! `check` loads and validates the configuration without touching the
//! kernel. Both accept the same overrides on top of the config file.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

/// flowtap - XDP packet capture and forwarding daemon.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "flowtap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging (-v). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Attach the capture program and forward batches until interrupted.
    Run(RunArgs),
    /// Validate the configuration and print the resolved settings.
    Check(RunArgs),
}

/// Config file location and per-setting overrides.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct RunArgs {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Network interface to attach the XDP program to.
    /// If not specified, uses the interface with the default route.
    #[arg(short, long)]
    pub iface: Option<String>,

    /// Compiled BPF object file.
    #[arg(short, long)]
    pub program: Option<PathBuf>,

    /// XDP function name inside the object.
    #[arg(short, long)]
    pub function: Option<String>,

    /// Collector endpoint batches are POSTed to.
    #[arg(short = 'u', long)]
    pub collector_url: Option<String>,

    /// Seconds between reporting cycles.
    #[arg(long)]
    pub interval_sec: Option<u64>,
}

/// Parse CLI arguments from an iterator of strings.
/// Useful for testing.
pub fn parse_from<I, T>(iter: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(iter)
}

/// Get the default network interface (the one with the default route).
/// Returns None if no default interface can be determined.
pub fn default_interface() -> Option<String> {
    let route_content = std::fs::read_to_string("/proc/net/route").ok()?;
    parse_route_table(&route_content)
}

/// Parse /proc/net/route content to find the default interface.
pub fn parse_route_table(content: &str) -> Option<String> {
    content
        .lines()
        .skip(1)
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .find(|fields| fields.len() >= 2 && fields[1] == "00000000")
        .map(|fields| fields[0].to_string())
}

/// Resolve the interface to use: explicit argument or auto-detected default.
pub fn resolve_interface(explicit: Option<&str>) -> Option<String> {
    explicit.map(String::from).or_else(default_interface)
}
