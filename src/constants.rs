//! Constants and default values for beatprobe.
//!
//! Everything the probe falls back to when the configuration is silent lives here.

use std::time::Duration;

/// Configuration file version this build understands.
pub const SUPPORTED_CONFIG_VERSION: &str = "1";

// ============================================================================
// Readiness
// ============================================================================

/// Marker a beat logs once its run loop is up.
pub const DEFAULT_READY_MARKER: &str = "wikipediabeat is running";

/// Maximum time to wait for the readiness marker.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between readiness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Window right after spawn during which an exit counts as a launch failure.
pub const DEFAULT_STARTUP_WINDOW: Duration = Duration::from_millis(200);

/// Interval between liveness checks inside the startup window.
pub const STARTUP_CHECK_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// Shutdown
// ============================================================================

/// How long a beat may take to exit after SIGTERM before it is force-killed.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Interval between `try_wait` calls while reaping the child.
pub const REAP_INTERVAL: Duration = Duration::from_millis(50);

/// Bound on the reap after SIGKILL. SIGKILL cannot be ignored, so this only
/// guards against uninterruptible sleep.
pub const FORCE_KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit code a beat reports after a clean, signal-initiated stop.
pub const DEFAULT_EXPECTED_EXIT_CODE: i32 = 0;

/// Offset added to a signal number to form a shell-style exit code.
pub const SIGNAL_EXIT_OFFSET: i32 = 128;

// ============================================================================
// Files
// ============================================================================

/// Flag the beat uses to take its configuration file.
pub const DEFAULT_CONFIG_FLAG: &str = "-c";

/// Extension of the rendered beat configuration.
pub const RENDERED_CONFIG_EXTENSION: &str = "yml";

/// Extension of the captured output log.
pub const OUTPUT_LOG_EXTENSION: &str = "log";

/// Prefix of temporary working directories.
pub const WORKING_DIR_PREFIX: &str = "beatprobe-";

/// Default probe configuration file name.
pub const DEFAULT_PROBE_CONFIG: &str = "beatprobe.yaml";

/// Number of log lines attached to failure diagnostics.
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;
