//! Command-line interface for beatprobe.
use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::config::{parse_duration, parse_var};
use crate::constants::DEFAULT_PROBE_CONFIG;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

fn parse_duration_arg(raw: &str) -> Result<std::time::Duration, String> {
    parse_duration(raw).map_err(|err| err.to_string())
}

/// Command-line interface for beatprobe.
#[derive(Parser)]
#[command(name = "beatprobe", version, author)]
#[command(about = "Start a beat, wait until it is ready, stop it and check its exit code", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for beatprobe.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the full probe: render, start, wait for readiness, stop, check exit code.
    Run {
        /// Path to the probe configuration file.
        #[arg(short, long, default_value = DEFAULT_PROBE_CONFIG)]
        config: PathBuf,

        /// Template variable override (repeatable).
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Override the readiness timeout (e.g. "500ms", "10s").
        #[arg(long, value_name = "DURATION", value_parser = parse_duration_arg)]
        timeout: Option<std::time::Duration>,

        /// Keep the temporary working directory after the run.
        #[arg(long)]
        keep: bool,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Render the beat configuration only.
    Render {
        /// Path to the probe configuration file.
        #[arg(short, long, default_value = DEFAULT_PROBE_CONFIG)]
        config: PathBuf,

        /// Template variable override (repeatable).
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Write the rendered config here instead of printing it.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
