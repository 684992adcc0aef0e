#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use beatprobe::config::{ProbeConfig, load_config};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tempfile::{TempDir, tempdir};

pub const MARKER_LINE: &str = "INFO wikipediabeat is running! Hit CTRL-C to stop it.";

/// Well-behaved beat: checks its config, logs the marker, exits 0 on SIGTERM.
pub const GOOD_BEAT: &str = r#"
[ "$1" = "-c" ] && [ -f "$2" ] || { echo "missing config: $*" >&2; exit 2; }
trap 'echo "wikipediabeat stopped"; exit 0' TERM
echo "INFO wikipediabeat is running! Hit CTRL-C to stop it."
while true; do sleep 0.05; done
"#;

/// Starts fine but never logs the readiness marker.
pub const SILENT_BEAT: &str = r#"
trap 'exit 0' TERM
echo "INFO starting"
while true; do sleep 0.05; done
"#;

/// Ignores SIGTERM entirely; the disposition is inherited by `sleep`.
pub const STUBBORN_BEAT: &str = r#"
trap '' TERM
echo "INFO wikipediabeat is running! Hit CTRL-C to stop it."
while true; do sleep 0.05; done
"#;

/// Stops on SIGTERM, but with a failure code.
pub const DIRTY_STOP_BEAT: &str = r#"
trap 'exit 3' TERM
echo "INFO wikipediabeat is running! Hit CTRL-C to stop it."
while true; do sleep 0.05; done
"#;

/// Survives the startup window, then crashes before becoming ready.
pub const CRASHING_BEAT: &str = r#"
sleep 0.3
echo "FATAL cannot open dump" >&2
exit 1
"#;

/// Writes its marker into the `log/` directory instead of stdout.
pub const FILE_LOGGING_BEAT: &str = r#"
trap 'exit 0' TERM
mkdir -p log
echo "wikipediabeat is running" > log/wikipediabeat-1.log
while true; do sleep 0.05; done
"#;

pub const TEMPLATE: &str = "wikipediabeat:\n  name: {{ path }}\n";

/// A probe project on disk: beat script, template and probe config.
pub struct Fixture {
    pub dir: TempDir,
    pub config_path: PathBuf,
}

impl Fixture {
    pub fn new(script: &str) -> Self {
        Self::with_settings(script, "")
    }

    /// `extra` is appended verbatim to the probe YAML.
    pub fn with_settings(script: &str, extra: &str) -> Self {
        let dir = tempdir().expect("failed to create tempdir");
        fs::write(dir.path().join("beat.sh"), script).expect("write beat script");
        fs::write(dir.path().join("wikipediabeat.yml.tmpl"), TEMPLATE)
            .expect("write template");

        let mut yaml = format!(
            r#"version: "1"
beat:
  name: wikipediabeat
  command: sh
  args: ["{}"]
template: wikipediabeat.yml.tmpl
vars:
  path: "{{{{ working_dir }}}}/log/*"
"#,
            dir.path().join("beat.sh").display()
        );
        yaml.push_str(extra);

        let config_path = dir.path().join("beatprobe.yaml");
        fs::write(&config_path, yaml).expect("write probe config");
        Self { dir, config_path }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> ProbeConfig {
        load_config(&self.config_path).expect("load probe config")
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system.process(Pid::from_u32(pid)).is_some()
}
