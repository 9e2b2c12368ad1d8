use airtank_core::{ConfigError, SchedulingMode};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub config_path: Option<PathBuf>,
    pub mode: SchedulingMode,
    pub run_seconds: Option<u64>,
    pub telemetry_addr: Option<String>,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            config_path: None,
            mode: SchedulingMode::Cooperative,
            run_seconds: None,
            telemetry_addr: None,
            json_logs: false,
            log_dir: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    /// Parse `args` (including the program name at index 0). Unknown flags
    /// are ignored; a malformed value for a known flag is an error.
    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    cfg.config_path = Some(PathBuf::from(value_of(args, i)?));
                    i += 1;
                }
                "--mode" => {
                    cfg.mode = value_of(args, i)?.parse()?;
                    i += 1;
                }
                "--run-seconds" => {
                    let value = value_of(args, i)?;
                    cfg.run_seconds = Some(value.parse().map_err(|_| {
                        ConfigError::Invalid(format!("--run-seconds expects seconds, got {value:?}"))
                    })?);
                    i += 1;
                }
                "--telemetry-addr" => {
                    cfg.telemetry_addr = Some(value_of(args, i)?.to_string());
                    i += 1;
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-dir" => {
                    cfg.log_dir = Some(PathBuf::from(value_of(args, i)?));
                    i += 1;
                }
                "-h" | "--help" => {
                    cfg.show_help = true;
                }
                _ => {}
            }
            i += 1;
        }
        Ok(cfg)
    }

    pub fn print_help() {
        println!(
            r#"airtank - air compressor controller

USAGE:
    airtank [OPTIONS]

OPTIONS:
    --config <PATH>          JSON settings delta applied over the defaults
    --mode <MODE>            Scheduling mode (cooperative|preemptive) [default: cooperative]
    --run-seconds <SECS>     Run for a fixed duration then exit
    --telemetry-addr <ADDR>  Serve /metrics, /status and log exports on address (e.g. 0.0.0.0:8080)
    --json-logs              Output logs in JSON format (for log aggregation)
    --log-dir <DIR>          Also write daily-rolling JSON logs into DIR
    -h, --help               Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                 Set log filter (e.g., RUST_LOG=debug,airtank_core=trace)

EXAMPLES:
    # Simulated compressor with telemetry
    airtank --telemetry-addr 127.0.0.1:8080

    # Tick on its own thread under a software watchdog
    airtank --mode preemptive --config /etc/airtank/settings.json

    # Short test run
    airtank --run-seconds 10
"#
        );
    }
}

fn value_of(args: &[String], flag_index: usize) -> Result<&str, ConfigError> {
    args.get(flag_index + 1)
        .map(String::as_str)
        .ok_or_else(|| ConfigError::Invalid(format!("{} expects a value", args[flag_index])))
}
