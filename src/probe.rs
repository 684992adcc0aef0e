//! The liveness probe: render, start, wait for readiness, stop, judge.
//!
//! A [`LivenessProbe`] walks a single beat through
//! `NotStarted → Running → SignalSent → Exited`. Each step is exposed on its own so
//! callers can interleave their own checks; [`LivenessProbe::run`] performs the whole
//! scenario and returns a [`ProbeReport`].
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};
use strum_macros::IntoStaticStr;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::constants::{
    DIAGNOSTIC_TAIL_LINES, OUTPUT_LOG_EXTENSION, RENDERED_CONFIG_EXTENSION,
    WORKING_DIR_PREFIX,
};
use crate::error::{LaunchError, ProbeError};
use crate::logs::LogObserver;
use crate::process::{BeatProcess, ExitOutcome, LaunchSpec};
use crate::template;
use crate::wait::Poller;

/// Lifecycle of the probed beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    /// Nothing has been launched yet.
    NotStarted,
    /// The beat is up.
    Running,
    /// SIGTERM has been delivered.
    SignalSent,
    /// The beat has been reaped. Terminal.
    Exited,
}

impl ProbeState {
    /// Snake-case name of the state.
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Where a probe keeps its files.
#[derive(Debug)]
enum WorkingDir {
    Fixed(PathBuf),
    Temporary(TempDir),
    Kept(PathBuf),
}

impl WorkingDir {
    fn path(&self) -> &Path {
        match self {
            Self::Fixed(path) | Self::Kept(path) => path,
            Self::Temporary(dir) => dir.path(),
        }
    }
}

/// Summary of a completed probe run.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Beat name.
    pub beat: String,
    /// PID the beat ran as.
    pub pid: u32,
    /// Working directory used for the run.
    pub working_dir: PathBuf,
    /// Rendered configuration file.
    pub config_path: PathBuf,
    /// Time between spawn and the readiness marker, in milliseconds.
    pub ready_after_ms: u64,
    /// How the beat ended.
    pub exit: ExitOutcome,
    /// Shell-style exit code.
    pub exit_code: i32,
    /// When the beat was launched.
    pub started_at: DateTime<Utc>,
    /// When the beat was reaped.
    pub finished_at: DateTime<Utc>,
}

fn builtin_vars(config: &ProbeConfig, working_dir: &Path) -> HashMap<String, String> {
    HashMap::from([
        ("working_dir".to_string(), working_dir.display().to_string()),
        ("beat_name".to_string(), config.beat.name.clone()),
    ])
}

/// Full variable set: built-ins, then config vars, then `overrides`.
///
/// Config and override values are themselves rendered against the built-ins
/// (`working_dir` and `beat_name`).
pub fn template_vars(
    config: &ProbeConfig,
    working_dir: &Path,
    overrides: &HashMap<String, String>,
) -> Result<HashMap<String, String>, ProbeError> {
    let builtins = builtin_vars(config, working_dir);
    let mut vars = builtins.clone();
    for (key, value) in config.vars.iter().chain(overrides) {
        vars.insert(key.clone(), template::render_str(value, &builtins)?);
    }
    Ok(vars)
}

/// Drives one beat through its lifecycle.
pub struct LivenessProbe {
    config: ProbeConfig,
    working_dir: WorkingDir,
    state: ProbeState,
    rendered_config: Option<PathBuf>,
    process: Option<BeatProcess>,
    started_at: Option<DateTime<Utc>>,
    ready_after: Option<Duration>,
    cancel: Option<Arc<AtomicBool>>,
}

impl LivenessProbe {
    /// Creates a probe, allocating a fresh temporary working directory unless the
    /// config pins one.
    pub fn new(config: ProbeConfig) -> Result<Self, ProbeError> {
        let working_dir = match &config.working_dir {
            Some(dir) => {
                let dir = config.resolve(dir);
                std::fs::create_dir_all(&dir)?;
                WorkingDir::Fixed(dir)
            }
            None => WorkingDir::Temporary(
                tempfile::Builder::new()
                    .prefix(WORKING_DIR_PREFIX)
                    .tempdir()?,
            ),
        };
        debug!("Probe working directory: {:?}", working_dir.path());

        Ok(Self {
            config,
            working_dir,
            state: ProbeState::NotStarted,
            rendered_config: None,
            process: None,
            started_at: None,
            ready_after: None,
            cancel: None,
        })
    }

    /// Aborts waits with [`ProbeError::Interrupted`] once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Keeps a temporary working directory on disk after the probe is dropped.
    pub fn keep_working_dir(&mut self) {
        let placeholder = WorkingDir::Kept(PathBuf::new());
        self.working_dir = match std::mem::replace(&mut self.working_dir, placeholder) {
            WorkingDir::Temporary(dir) => WorkingDir::Kept(dir.keep()),
            other => other,
        };
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// Directory holding the rendered config and output log.
    pub fn working_dir(&self) -> &Path {
        self.working_dir.path()
    }

    /// The probe configuration.
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Time the beat took to log its readiness marker.
    pub fn ready_after(&self) -> Option<Duration> {
        self.ready_after
    }

    /// The running beat, if any.
    pub fn process(&mut self) -> Option<&mut BeatProcess> {
        self.process.as_mut()
    }

    /// Path the beat's stdout and stderr are captured to.
    pub fn output_log(&self) -> PathBuf {
        self.working_dir().join(format!(
            "{}.{}",
            self.config.beat.name, OUTPUT_LOG_EXTENSION
        ))
    }

    /// Path the rendered beat configuration is written to.
    pub fn config_output_path(&self) -> PathBuf {
        self.working_dir().join(format!(
            "{}.{}",
            self.config.beat.name, RENDERED_CONFIG_EXTENSION
        ))
    }

    /// Observer over the readiness log glob.
    pub fn log_observer(&self) -> Result<LogObserver, ProbeError> {
        let pattern = match &self.config.readiness.log {
            Some(pattern) => template::render_str(pattern, &self.builtin_vars())?,
            None => glob::Pattern::escape(&self.output_log().to_string_lossy()),
        };
        LogObserver::new(pattern)
    }

    fn builtin_vars(&self) -> HashMap<String, String> {
        builtin_vars(&self.config, self.working_dir())
    }

    /// Full variable set for this run's working directory. See [`template_vars`].
    pub fn template_vars(
        &self,
        overrides: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>, ProbeError> {
        template_vars(&self.config, self.working_dir(), overrides)
    }

    /// Materializes the beat configuration from the template.
    pub fn render_config(
        &mut self,
        substitutions: &HashMap<String, String>,
    ) -> Result<PathBuf, ProbeError> {
        self.expect_state(ProbeState::NotStarted, "render config")?;

        let vars = self.template_vars(substitutions)?;
        let template_path = self.config.resolve(&self.config.template);
        let rendered =
            template::render_file(&template_path, &self.config_output_path(), &vars)?;

        info!("Rendered beat config {:?}", rendered);
        self.rendered_config = Some(rendered.clone());
        Ok(rendered)
    }

    /// Launches the beat with the rendered configuration.
    pub fn start_process(&mut self) -> Result<u32, ProbeError> {
        self.expect_state(ProbeState::NotStarted, "start process")?;
        let config_path = self.rendered_config.clone().ok_or(ProbeError::InvalidState {
            operation: "start process before rendering config",
            state: self.state.name(),
        })?;

        let spec = LaunchSpec {
            name: self.config.beat.name.clone(),
            command: self.config.resolved_command(),
            args: self.config.beat.args.clone(),
            config_flag: self.config.beat.config_flag.clone(),
            config_path,
            env: self.config.beat.env.clone(),
            working_dir: self.working_dir().to_path_buf(),
            output_log: self.output_log(),
            startup_window: self.config.readiness.startup_window,
        };

        self.started_at = Some(Utc::now());
        let process = BeatProcess::spawn(&spec)?;
        let pid = process.pid();
        info!("Beat '{}' running with PID {pid}", spec.name);

        self.process = Some(process);
        self.state = ProbeState::Running;
        Ok(pid)
    }

    /// Polls `predicate` under the configured interval until it holds or `timeout`
    /// elapses.
    pub fn wait_until<F>(
        &self,
        condition: &str,
        timeout: Duration,
        predicate: F,
    ) -> Result<Duration, ProbeError>
    where
        F: FnMut() -> Result<bool, ProbeError>,
    {
        self.poller(timeout).until(condition, predicate)
    }

    fn poller(&self, timeout: Duration) -> Poller {
        let poller = Poller::new(timeout, self.config.readiness.interval);
        match &self.cancel {
            Some(flag) => poller.with_cancel(flag.clone()),
            None => poller,
        }
    }

    /// Waits for the readiness marker to show up in the log.
    ///
    /// Fails fast with a launch error if the beat exits while waiting.
    pub fn wait_for_ready(&mut self) -> Result<Duration, ProbeError> {
        self.expect_state(ProbeState::Running, "wait for readiness")?;

        let observer = self.log_observer()?;
        let marker = self.config.readiness.marker.clone();
        let timeout = self.config.readiness.timeout;
        let condition = format!("log {} to contain '{marker}'", observer.pattern());

        let poller = self.poller(timeout);
        let name = self.config.beat.name.clone();
        let mut process = self.process.as_mut();
        let result = poller.until(&condition, || {
            if observer.contains(&marker) {
                return Ok(true);
            }
            if let Some(process) = process.as_mut()
                && let Some(outcome) = process.try_wait()?
            {
                return Err(ProbeError::LaunchError {
                    beat: name.clone(),
                    source: LaunchError::ExitedEarly(outcome),
                });
            }
            Ok(false)
        });

        match result {
            Ok(elapsed) => {
                info!(
                    "Beat '{}' ready after {elapsed:?}",
                    self.config.beat.name
                );
                self.ready_after = Some(elapsed);
                Ok(elapsed)
            }
            Err(err) => {
                if let Some(process) = &mut self.process
                    && !process.is_running()
                {
                    self.state = ProbeState::Exited;
                }
                self.log_diagnostics(&observer);
                Err(err)
            }
        }
    }

    /// Sends SIGTERM and waits for the beat to exit, returning its exit code.
    pub fn kill_and_wait(&mut self) -> Result<i32, ProbeError> {
        self.expect_state(ProbeState::Running, "kill")?;
        let grace = self.config.shutdown.grace;
        let process = self.process.as_mut().ok_or(ProbeError::InvalidState {
            operation: "kill",
            state: ProbeState::NotStarted.name(),
        })?;

        self.state = ProbeState::SignalSent;
        let result = process.kill_and_wait(grace);
        self.state = ProbeState::Exited;

        let outcome = result?;
        info!(
            "Beat '{}' stopped with {outcome}",
            self.config.beat.name
        );
        Ok(outcome.exit_code())
    }

    /// Renders, starts, waits for readiness, stops, and checks the exit code.
    pub fn run(
        &mut self,
        substitutions: &HashMap<String, String>,
    ) -> Result<ProbeReport, ProbeError> {
        let config_path = self.render_config(substitutions)?;
        let pid = self.start_process()?;
        let ready_after = self.wait_for_ready()?;
        let exit_code = self.kill_and_wait()?;

        let expected = self.config.shutdown.expected_exit_code;
        if exit_code != expected {
            return Err(ProbeError::UnexpectedExitCode {
                beat: self.config.beat.name.clone(),
                expected,
                actual: exit_code,
            });
        }

        let exit = self
            .process
            .as_ref()
            .and_then(BeatProcess::outcome)
            .unwrap_or(ExitOutcome {
                code: Some(exit_code),
                signal: None,
            });

        Ok(ProbeReport {
            beat: self.config.beat.name.clone(),
            pid,
            working_dir: self.working_dir().to_path_buf(),
            config_path,
            ready_after_ms: ready_after.as_millis() as u64,
            exit,
            exit_code,
            started_at: self.started_at.unwrap_or_else(Utc::now),
            finished_at: Utc::now(),
        })
    }

    fn expect_state(
        &self,
        expected: ProbeState,
        operation: &'static str,
    ) -> Result<(), ProbeError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ProbeError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    fn log_diagnostics(&self, observer: &LogObserver) {
        let tail = observer.tail(DIAGNOSTIC_TAIL_LINES);
        if tail.is_empty() {
            warn!(
                "No log output matched '{}' for beat '{}'",
                observer.pattern(),
                self.config.beat.name
            );
        } else {
            warn!(
                "Last {} log line(s) of beat '{}':\n{}",
                tail.len(),
                self.config.beat.name,
                tail.join("\n")
            );
        }
    }
}
