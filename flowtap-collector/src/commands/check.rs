//! Check command: load, override and validate configuration.

use crate::cli::RunArgs;
use crate::config::{Config, Settings};

use super::CommandResult;

/// Resolve the effective settings without touching the kernel.
pub fn execute_check(args: &RunArgs) -> CommandResult<Settings> {
    let config = Config::from_args(args)?;
    Ok(config.resolve()?)
}

/// Human-readable dump of `settings`, one `key = value` per line.
pub fn render_settings(settings: &Settings) -> String {
    let trace_pipe = settings
        .trace_pipe
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "disabled".to_string());

    [
        format!("interface = {}", settings.interface),
        format!("program = {}", settings.program.display()),
        format!("function = {}", settings.function),
        format!("poll_timeout_ms = {}", settings.poll_timeout.as_millis()),
        format!("collector_url = {}", settings.collector_url),
        format!("request_timeout_ms = {}", settings.request_timeout.as_millis()),
        format!("max_retries = {}", settings.max_retries),
        format!("interval_sec = {}", settings.interval.as_secs()),
        format!("max_events = {}", settings.max_events),
        format!("idle_cycles = {}", settings.idle_cycles),
        format!(
            "clear_counters_after_read = {}",
            settings.clear_counters_after_read
        ),
        format!("trace_pipe = {trace_pipe}"),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;
    use crate::commands::CommandError;
    use crate::config::ConfigError;
    use crate::exit::{codes, exit_code};

    fn args_for(file: &tempfile::NamedTempFile) -> RunArgs {
        RunArgs {
            config: Some(file.path().to_path_buf()),
            iface: Some("eth0".into()),
            program: None,
            function: None,
            collector_url: None,
            interval_sec: None,
        }
    }

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(content.as_bytes()).expect("write");
        file
    }

    #[test]
    fn test_check_valid_config() {
        let file = config_file(
            "[capture]\nprogram = \"/opt/filter.o\"\n[collector]\nurl = \"http://dash/api/\"\n",
        );
        let settings = execute_check(&args_for(&file)).expect("check");

        assert_eq!(settings.interface, "eth0");
        assert_eq!(settings.program, PathBuf::from("/opt/filter.o"));

        let rendered = render_settings(&settings);
        assert!(rendered.contains("interface = eth0"));
        assert!(rendered.contains("collector_url = http://dash/api/"));
        assert!(rendered.contains("interval_sec = 50"));
        assert!(rendered.contains("trace_pipe = disabled"));
    }

    #[test]
    fn test_check_missing_url_is_config_error() {
        let file = config_file("[capture]\nprogram = \"/opt/filter.o\"\n");
        let err = execute_check(&args_for(&file)).unwrap_err();

        assert!(matches!(
            err,
            CommandError::Config(ConfigError::Missing("collector.url"))
        ));
        assert_eq!(exit_code(&err), codes::CONFIG_ERROR);
    }

    #[test]
    fn test_check_cli_supplies_missing_values() {
        let file = config_file("");
        let args = RunArgs {
            program: Some(PathBuf::from("/opt/filter.o")),
            collector_url: Some("http://dash/api/".into()),
            ..args_for(&file)
        };
        assert!(execute_check(&args).is_ok());
    }

    #[test]
    fn test_check_unparseable_file() {
        let file = config_file("[capture\n");
        let err = execute_check(&args_for(&file)).unwrap_err();
        assert!(matches!(err, CommandError::Config(ConfigError::Parse(_))));
    }
}
