//! flowtap binary.
//!
//! Entry point for the `flowtap` daemon.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use flowtap_collector::exit::{codes, exit_code};
use flowtap_collector::{
    execute_check, init_tracing, render_settings, Cli, Command, CommandError, Config,
    DiagnosticTap, HttpTransport, Logger, RunArgs, RunSummary, Settings, ShutdownFlag,
    TracingLogger, Verbosity,
};
#[cfg(feature = "bpf")]
use flowtap_collector::{execute_run, RealSleeper};

/// How long to wait for the trace tap thread on shutdown.
const TAP_GRACE: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(Verbosity::from_count(cli.verbose));

    let result = match cli.command {
        Command::Run(args) => run_run(&args),
        Command::Check(args) => run_check(&args),
    };

    match result {
        Ok(()) => ExitCode::from(codes::SUCCESS as u8),
        Err(e) => {
            TracingLogger.error(&e.to_string());
            eprintln!("error: {e}");
            ExitCode::from(exit_code(&e) as u8)
        }
    }
}

/// Run the check command.
fn run_check(args: &RunArgs) -> Result<(), CommandError> {
    let settings = execute_check(args)?;
    println!("{}", render_settings(&settings));
    Ok(())
}

/// Run the daemon until SIGINT/SIGTERM.
fn run_run(args: &RunArgs) -> Result<(), CommandError> {
    let settings = Config::from_args(args)?.resolve()?;
    let shutdown = ShutdownFlag::install();
    let logger = TracingLogger;

    let tap = match settings.trace_pipe.as_deref() {
        Some(path) => match DiagnosticTap::open(path, logger, ShutdownFlag::manual()) {
            Ok(tap) => Some(tap),
            Err(e) => {
                logger.warn(&format!("cannot open trace stream {}: {e}", path.display()));
                None
            }
        },
        None => None,
    };

    let result = run_capture(&settings, logger, &shutdown);

    if let Some(tap) = tap {
        if tap.stop(TAP_GRACE).is_none() {
            logger.debug("trace tap still blocked in read, leaving it detached");
        }
    }

    let summary = result?;
    logger.info(&format!(
        "stopped after {} cycles: {} events, {} batches delivered, {} failed",
        summary.cycles, summary.events, summary.delivered, summary.failed
    ));
    Ok(())
}

#[cfg(feature = "bpf")]
fn run_capture(
    settings: &Settings,
    logger: TracingLogger,
    shutdown: &ShutdownFlag,
) -> Result<RunSummary, CommandError> {
    let program = flowtap_bpf::BpfCapture::load(&settings.program)?;
    let transport = HttpTransport::new(settings.request_timeout)?;
    execute_run(settings, program, transport, logger, RealSleeper, shutdown)
}

#[cfg(not(feature = "bpf"))]
fn run_capture(
    settings: &Settings,
    logger: TracingLogger,
    _shutdown: &ShutdownFlag,
) -> Result<RunSummary, CommandError> {
    HttpTransport::new(settings.request_timeout)?;
    logger.error(&format!(
        "cannot attach to {}: built without BPF support",
        settings.interface
    ));
    Err(CommandError::Unsupported("bpf"))
}
