//! Observation of the beat's log output.
use std::{
    fs::{self, File},
    io::{BufRead, BufReader},
    path::PathBuf,
};
use tracing::trace;

use crate::error::ProbeError;

/// Read-only view over the log files matching a glob.
#[derive(Debug, Clone)]
pub struct LogObserver {
    pattern: String,
}

impl LogObserver {
    /// Creates an observer for `pattern`, rejecting invalid globs up front.
    pub fn new(pattern: impl Into<String>) -> Result<Self, ProbeError> {
        let pattern = pattern.into();
        glob::Pattern::new(&pattern).map_err(|err| {
            ProbeError::ConfigError(format!("invalid log glob '{pattern}': {err}"))
        })?;
        Ok(Self { pattern })
    }

    /// The glob this observer watches.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Regular files currently matching the glob, in path order.
    pub fn files(&self) -> Vec<PathBuf> {
        let Ok(paths) = glob::glob(&self.pattern) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = paths
            .filter_map(Result::ok)
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        files
    }

    /// Whether any matching file contains `marker`.
    ///
    /// Files that are missing or unreadable are skipped; the log may not exist yet.
    pub fn contains(&self, marker: &str) -> bool {
        self.files().into_iter().any(|path| {
            match fs::read(&path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).contains(marker),
                Err(err) => {
                    trace!("Skipping unreadable log {:?}: {err}", path);
                    false
                }
            }
        })
    }

    /// The last `lines` lines across all matching files.
    pub fn tail(&self, lines: usize) -> Vec<String> {
        let mut all_lines = Vec::new();
        for path in self.files() {
            if let Ok(file) = File::open(&path) {
                all_lines.extend(BufReader::new(file).lines().map_while(Result::ok));
            }
        }

        let start = all_lines.len().saturating_sub(lines);
        all_lines.split_off(start)
    }
}
