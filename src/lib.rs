//! Beatprobe is a liveness probe for daemon-style data shippers ("beats"). It renders
//! a beat's configuration from a template, launches the beat, waits for a readiness
//! marker to appear in its log, then stops it with SIGTERM and checks that it exits
//! with the expected clean-stop code.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Default values.
pub mod constants;

/// Error handling.
pub mod error;

/// Log observation.
pub mod logs;

/// The probe lifecycle driver.
pub mod probe;

/// Beat process handling.
pub mod process;

/// Config template rendering.
pub mod template;

/// Bounded polling.
pub mod wait;
