//! Configuration management for beatprobe.
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use crate::constants::{
    DEFAULT_CONFIG_FLAG, DEFAULT_EXPECTED_EXIT_CODE, DEFAULT_POLL_INTERVAL,
    DEFAULT_READY_MARKER, DEFAULT_READY_TIMEOUT, DEFAULT_SHUTDOWN_GRACE,
    DEFAULT_STARTUP_WINDOW, SUPPORTED_CONFIG_VERSION,
};
use crate::error::ProbeError;

/// Represents the structure of the probe configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Configuration version.
    pub version: String,
    /// The beat under probe.
    pub beat: BeatConfig,
    /// Template rendered into the beat's configuration file.
    pub template: PathBuf,
    /// Fixed working directory. A fresh temporary directory is used when absent.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Template variables. Values may reference the built-in variables.
    #[serde(default)]
    pub vars: HashMap<String, String>,
    /// Readiness detection settings.
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Shutdown settings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    /// Directory from which relative paths are resolved.
    #[serde(skip)]
    pub project_dir: PathBuf,
}

/// How to launch the beat.
#[derive(Debug, Clone, Deserialize)]
pub struct BeatConfig {
    /// Beat name; names the rendered config and output log.
    pub name: String,
    /// Executable to run.
    pub command: PathBuf,
    /// Arguments placed before the config flag.
    #[serde(default)]
    pub args: Vec<String>,
    /// Flag introducing the rendered configuration path.
    #[serde(default = "default_config_flag")]
    pub config_flag: String,
    /// Extra environment for the beat.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// When the beat counts as ready.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessConfig {
    /// Substring that signals readiness.
    #[serde(default = "default_marker")]
    pub marker: String,
    /// Glob of log files to search. Defaults to the captured output log.
    #[serde(default)]
    pub log: Option<String>,
    /// Bound on the wait for the marker.
    #[serde(default = "default_ready_timeout", deserialize_with = "de_duration")]
    pub timeout: Duration,
    /// Interval between checks.
    #[serde(default = "default_poll_interval", deserialize_with = "de_duration")]
    pub interval: Duration,
    /// Window after spawn in which an exit counts as a launch failure.
    #[serde(default = "default_startup_window", deserialize_with = "de_duration")]
    pub startup_window: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            log: None,
            timeout: DEFAULT_READY_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
            startup_window: DEFAULT_STARTUP_WINDOW,
        }
    }
}

/// How the beat is stopped and judged.
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// Time allowed between SIGTERM and exit.
    #[serde(default = "default_grace", deserialize_with = "de_duration")]
    pub grace: Duration,
    /// Exit code of a clean, signal-initiated stop.
    #[serde(default = "default_expected_exit_code")]
    pub expected_exit_code: i32,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace: DEFAULT_SHUTDOWN_GRACE,
            expected_exit_code: DEFAULT_EXPECTED_EXIT_CODE,
        }
    }
}

fn default_config_flag() -> String {
    DEFAULT_CONFIG_FLAG.to_string()
}

fn default_marker() -> String {
    DEFAULT_READY_MARKER.to_string()
}

fn default_ready_timeout() -> Duration {
    DEFAULT_READY_TIMEOUT
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_startup_window() -> Duration {
    DEFAULT_STARTUP_WINDOW
}

fn default_grace() -> Duration {
    DEFAULT_SHUTDOWN_GRACE
}

fn default_expected_exit_code() -> i32 {
    DEFAULT_EXPECTED_EXIT_CODE
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// Parses `"250ms"`, `"5s"`, `"2m"`, `"1h"` or bare seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ProbeError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ProbeError::ConfigError(
            "Duration value cannot be empty".into(),
        ));
    }

    let (amount_str, millis_per_unit) = if let Some(stripped) = value.strip_suffix("ms")
    {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1_000)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60_000)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3_600_000)
    } else {
        (value, 1_000)
    };

    let amount: u64 = amount_str.parse().map_err(|_| {
        ProbeError::ConfigError(format!("Invalid duration value: '{raw}'"))
    })?;

    Ok(Duration::from_millis(amount.saturating_mul(millis_per_unit)))
}

fn env_var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("env var pattern is valid")
    })
}

/// Expands `$VAR` and `${VAR}` references from the environment.
fn expand_env_vars(input: &str) -> Result<String, ProbeError> {
    let mut missing = None;
    let result = env_var_re().replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.get_or_insert_with(|| var_name.to_string());
            String::new()
        })
    });

    match missing {
        Some(name) => Err(ProbeError::ConfigError(format!(
            "Missing environment variable: {name}"
        ))),
        None => Ok(result.into_owned()),
    }
}

/// Parses a `key=value` pair as given on the command line.
pub fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

impl ProbeConfig {
    /// Resolves `path` against the directory the config was loaded from.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    /// Command with a relative path resolved; bare names are left for `PATH` lookup.
    pub fn resolved_command(&self) -> PathBuf {
        let command = &self.beat.command;
        if command.components().count() > 1 {
            self.resolve(command)
        } else {
            command.clone()
        }
    }

    fn validate(&self) -> Result<(), ProbeError> {
        if self.version.trim() != SUPPORTED_CONFIG_VERSION {
            return Err(ProbeError::ConfigError(format!(
                "unsupported config version '{}' (expected '{SUPPORTED_CONFIG_VERSION}')",
                self.version
            )));
        }
        if self.beat.name.trim().is_empty() {
            return Err(ProbeError::ConfigError("beat.name cannot be empty".into()));
        }
        if self.beat.name.contains('/') {
            return Err(ProbeError::ConfigError(format!(
                "beat.name '{}' must not contain '/'",
                self.beat.name
            )));
        }
        if self.readiness.marker.is_empty() {
            return Err(ProbeError::ConfigError(
                "readiness.marker cannot be empty".into(),
            ));
        }
        if self.readiness.interval.is_zero() {
            return Err(ProbeError::ConfigError(
                "readiness.interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Loads and parses the probe configuration file, expanding environment variables.
pub fn load_config(config_path: &Path) -> Result<ProbeConfig, ProbeError> {
    let content = fs::read_to_string(config_path).map_err(|e| {
        ProbeError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded = expand_env_vars(&content)?;
    let mut config: ProbeConfig = serde_yaml::from_str(&expanded)?;

    config.project_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    config.validate()?;

    Ok(config)
}
