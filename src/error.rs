//! Error handling for beatprobe.
use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::process::ExitOutcome;

/// Defines all possible errors that can occur while probing a beat.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Error reading or accessing the probe configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[source] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// The configuration parsed but carries an unusable value.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The beat configuration template could not be materialized.
    #[error("Failed to render config: {0}")]
    ConfigRenderError(#[from] RenderError),

    /// The beat could not be brought up.
    #[error("Failed to launch beat '{beat}': {source}")]
    LaunchError {
        /// The beat that failed to launch.
        beat: String,
        /// What went wrong during launch.
        #[source]
        source: LaunchError,
    },

    /// A polled condition never became true.
    #[error("Timed out after {timeout:?} waiting for {condition}")]
    TimeoutError {
        /// Human-readable description of the awaited condition.
        condition: String,
        /// The bound that elapsed.
        timeout: Duration,
    },

    /// The beat ignored the termination signal for the whole grace period.
    #[error("Beat '{beat}' (PID {pid}) did not exit within {grace:?} of SIGTERM")]
    ProcessWaitError {
        /// The beat that refused to stop.
        beat: String,
        /// PID of the unresponsive process.
        pid: u32,
        /// Grace period that elapsed before escalation.
        grace: Duration,
    },

    /// The beat stopped, but not with the expected clean-stop code.
    #[error("Beat '{beat}' exited with code {actual}, expected {expected}")]
    UnexpectedExitCode {
        /// The beat under probe.
        beat: String,
        /// The expected clean-stop code.
        expected: i32,
        /// The observed exit code.
        actual: i32,
    },

    /// An operation was invoked in the wrong lifecycle state.
    #[error("Cannot {operation} while probe is {state}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// The state the probe was in.
        state: &'static str,
    },

    /// The run was cancelled from outside (e.g. Ctrl-C).
    #[error("Probe interrupted")]
    Interrupted,

    /// Delivering a signal failed.
    #[error("Failed to signal process: {0}")]
    SignalError(#[from] nix::errno::Errno),

    /// Generic I/O failure while waiting on the child.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error type for template rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Error reading the template file.
    #[error("Failed to read template {path:?}: {source}")]
    ReadError {
        /// Template path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error writing the rendered output.
    #[error("Failed to write rendered config {path:?}: {source}")]
    WriteError {
        /// Output path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A `{{` that does not open a valid placeholder.
    #[error("Malformed placeholder at byte {offset}")]
    Malformed {
        /// Byte offset into the template text.
        offset: usize,
    },

    /// A placeholder names a variable that was not supplied.
    #[error("Unknown template variable '{0}'")]
    UnknownVariable(String),
}

/// Error type for launching a beat.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The executable could not be spawned (missing, not executable, ...).
    #[error("spawn failed: {0}")]
    Spawn(#[from] std::io::Error),

    /// The executable started but exited before it became ready.
    #[error("process exited during startup ({0})")]
    ExitedEarly(ExitOutcome),
}
