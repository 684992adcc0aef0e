//! Child process handling for the beat under probe.
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use serde::Serialize;
use std::{
    collections::HashMap,
    fmt,
    fs::{File, OpenOptions},
    os::unix::process::{CommandExt, ExitStatusExt},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::constants::{
    FORCE_KILL_REAP_TIMEOUT, REAP_INTERVAL, SIGNAL_EXIT_OFFSET, STARTUP_CHECK_INTERVAL,
};
use crate::error::{LaunchError, ProbeError};
use crate::wait::deadline_after;

/// How a beat process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitOutcome {
    /// Exit code returned by the process if it terminated normally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// Signal number if the process was terminated by a signal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
}

impl ExitOutcome {
    /// Shell-style exit code: the real code, or `128 + signal`.
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => SIGNAL_EXIT_OFFSET + signal,
            (None, None) => -1,
        }
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "killed by signal {signal}"),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Everything needed to launch a beat.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Beat name, used for logging and file names.
    pub name: String,
    /// Executable to run.
    pub command: PathBuf,
    /// Arguments placed before the config flag.
    pub args: Vec<String>,
    /// Flag that introduces the configuration path.
    pub config_flag: String,
    /// Rendered configuration file.
    pub config_path: PathBuf,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Working directory of the child.
    pub working_dir: PathBuf,
    /// File receiving the child's stdout and stderr.
    pub output_log: PathBuf,
    /// Window right after spawn during which an exit is a launch failure.
    pub startup_window: Duration,
}

/// Handle to a running beat.
///
/// Dropping a handle whose child is still alive kills the child's process group.
#[derive(Debug)]
pub struct BeatProcess {
    name: String,
    child: Child,
    output_log: PathBuf,
    outcome: Option<ExitOutcome>,
}

impl BeatProcess {
    /// Spawns the beat described by `spec`.
    ///
    /// The child runs in its own process group with stdout and stderr appended to
    /// `spec.output_log`. If it exits inside the startup window the launch fails.
    pub fn spawn(spec: &LaunchSpec) -> Result<Self, ProbeError> {
        let launch_error = |source: LaunchError| ProbeError::LaunchError {
            beat: spec.name.clone(),
            source,
        };

        let log = open_output_log(&spec.output_log)
            .map_err(|err| launch_error(LaunchError::Spawn(err)))?;
        let log_err = log
            .try_clone()
            .map_err(|err| launch_error(LaunchError::Spawn(err)))?;

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .arg(&spec.config_flag)
            .arg(&spec.config_path)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        unsafe {
            cmd.pre_exec(|| {
                // Own process group so termination reaches the whole tree without
                // touching the probe's group.
                if libc::setpgid(0, 0) < 0 {
                    return Err(std::io::Error::last_os_error());
                }

                #[cfg(target_os = "linux")]
                {
                    use libc::{PR_SET_PDEATHSIG, SIGTERM, prctl};
                    if prctl(PR_SET_PDEATHSIG, SIGTERM, 0, 0, 0) < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }

                Ok(())
            });
        }

        debug!("Executing command: {cmd:?}");
        let child = cmd
            .spawn()
            .map_err(|err| launch_error(LaunchError::Spawn(err)))?;

        let mut process = Self {
            name: spec.name.clone(),
            child,
            output_log: spec.output_log.clone(),
            outcome: None,
        };
        debug!("Beat '{}' started with PID: {}", process.name, process.pid());

        let deadline = deadline_after(Instant::now(), spec.startup_window);
        while deadline.is_none_or(|deadline| Instant::now() < deadline) {
            if let Some(outcome) = process.try_wait()? {
                return Err(launch_error(LaunchError::ExitedEarly(outcome)));
            }
            thread::sleep(STARTUP_CHECK_INTERVAL);
        }

        Ok(process)
    }

    /// Beat name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// PID of the child.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// File the child's output is written to.
    pub fn output_log(&self) -> &Path {
        &self.output_log
    }

    /// Exit outcome, once the child has been reaped.
    pub fn outcome(&self) -> Option<ExitOutcome> {
        self.outcome
    }

    /// Non-blocking check whether the child has exited. Reaps it if so.
    pub fn try_wait(&mut self) -> Result<Option<ExitOutcome>, ProbeError> {
        if let Some(outcome) = self.outcome {
            return Ok(Some(outcome));
        }
        let outcome = self.child.try_wait()?.map(ExitOutcome::from);
        self.outcome = outcome;
        Ok(outcome)
    }

    /// Whether the child is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Sends `signal` to the child's process group, falling back to the child
    /// itself when the group cannot be signalled.
    ///
    /// A child that is already gone is not an error.
    pub fn signal(&self, sig: Signal) -> Result<(), ProbeError> {
        let pid = Pid::from_raw(self.pid() as i32);

        match signal::killpg(pid, sig) {
            Ok(()) => {
                debug!("Sent {sig} to process group {pid} of '{}'", self.name);
                return Ok(());
            }
            Err(Errno::ESRCH) => {
                debug!("Process group of '{}' missing; signalling directly", self.name)
            }
            Err(Errno::EPERM) => warn!(
                "Insufficient permissions to signal process group {pid} for '{}'",
                self.name
            ),
            Err(err) => return Err(err.into()),
        }

        match signal::kill(pid, sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Blocks until the child exits or `timeout` elapses, returning `Ok(None)` on timeout.
    pub fn wait_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ExitOutcome>, ProbeError> {
        let deadline = deadline_after(Instant::now(), timeout);
        loop {
            if let Some(outcome) = self.try_wait()? {
                return Ok(Some(outcome));
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(None);
            }
            thread::sleep(REAP_INTERVAL);
        }
    }

    /// Sends SIGTERM and waits up to `grace` for the child to exit.
    ///
    /// On timeout the child is sent SIGKILL and reaped before
    /// [`ProbeError::ProcessWaitError`] is returned.
    pub fn kill_and_wait(&mut self, grace: Duration) -> Result<ExitOutcome, ProbeError> {
        if let Some(outcome) = self.try_wait()? {
            debug!("Beat '{}' already exited before SIGTERM", self.name);
            return Ok(outcome);
        }

        self.signal(Signal::SIGTERM)?;
        if let Some(outcome) = self.wait_timeout(grace)? {
            debug!("Beat '{}' stopped: {outcome}", self.name);
            return Ok(outcome);
        }

        warn!(
            "Beat '{}' did not exit after SIGTERM; sending SIGKILL",
            self.name
        );
        self.force_kill();
        Err(ProbeError::ProcessWaitError {
            beat: self.name.clone(),
            pid: self.pid(),
            grace,
        })
    }

    /// SIGKILLs the process group and reaps the child. Best effort.
    fn force_kill(&mut self) {
        if let Err(err) = self.signal(Signal::SIGKILL) {
            warn!("Failed to SIGKILL beat '{}': {err}", self.name);
        }
        match self.wait_timeout(FORCE_KILL_REAP_TIMEOUT) {
            Ok(Some(_)) => {}
            Ok(None) => warn!("Beat '{}' survived SIGKILL", self.name),
            Err(err) => warn!("Failed to reap beat '{}': {err}", self.name),
        }
    }
}

impl Drop for BeatProcess {
    fn drop(&mut self) {
        if self.is_running() {
            debug!("Killing orphaned beat '{}' on drop", self.name);
            self.force_kill();
        }
    }
}

fn open_output_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
