#[path = "common/mod.rs"]
mod common;

use std::{
    collections::HashMap,
    fs,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use beatprobe::{
    error::{LaunchError, ProbeError},
    probe::{LivenessProbe, ProbeState},
};
use common::{
    CRASHING_BEAT, FILE_LOGGING_BEAT, Fixture, GOOD_BEAT, SILENT_BEAT, is_process_alive,
};

#[test]
fn beat_starts_logs_marker_and_stops_cleanly() {
    let fixture = Fixture::new(GOOD_BEAT);
    let mut probe = LivenessProbe::new(fixture.config()).expect("create probe");
    let working_dir = probe.working_dir().to_path_buf();

    let rendered = probe
        .render_config(&HashMap::new())
        .expect("render config");
    assert_eq!(
        fs::read_to_string(&rendered).unwrap(),
        format!("wikipediabeat:\n  name: {}/log/*\n", working_dir.display())
    );

    probe.start_process().expect("start beat");
    assert_eq!(probe.state(), ProbeState::Running);

    probe.wait_for_ready().expect("beat never became ready");
    assert!(probe.ready_after().is_some());

    let exit_code = probe.kill_and_wait().expect("kill beat");
    assert_eq!(exit_code, 0);
    assert_eq!(probe.state(), ProbeState::Exited);

    let log = fs::read_to_string(probe.output_log()).unwrap();
    assert!(log.contains(common::MARKER_LINE));
    assert!(log.contains("wikipediabeat stopped"));
}

#[test]
fn run_produces_report() {
    let fixture = Fixture::new(GOOD_BEAT);
    let mut probe = LivenessProbe::new(fixture.config()).expect("create probe");

    let report = probe.run(&HashMap::new()).expect("probe run");

    assert_eq!(report.beat, "wikipediabeat");
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.exit.code, Some(0));
    assert!(report.finished_at >= report.started_at);
    assert!(!is_process_alive(report.pid));
}

#[test]
fn missing_marker_times_out_and_cleans_up() {
    let fixture = Fixture::with_settings(
        SILENT_BEAT,
        "readiness:\n  timeout: 500ms\n  interval: 50ms\n",
    );
    let mut probe = LivenessProbe::new(fixture.config()).expect("create probe");
    probe.render_config(&HashMap::new()).expect("render config");
    let pid = probe.start_process().expect("start beat");

    let err = probe.wait_for_ready().unwrap_err();
    assert!(matches!(err, ProbeError::TimeoutError { .. }), "got {err:?}");
    assert_eq!(probe.state(), ProbeState::Running);

    drop(probe);
    assert!(!is_process_alive(pid));
}

#[test]
fn crash_while_waiting_is_a_launch_error() {
    let fixture = Fixture::with_settings(
        CRASHING_BEAT,
        "readiness:\n  timeout: 5s\n  interval: 20ms\n  startup_window: 50ms\n",
    );
    let mut probe = LivenessProbe::new(fixture.config()).expect("create probe");

    let err = probe.run(&HashMap::new()).unwrap_err();

    assert!(
        matches!(
            err,
            ProbeError::LaunchError {
                source: LaunchError::ExitedEarly(ref outcome),
                ..
            } if outcome.code == Some(1)
        ),
        "got {err:?}"
    );
    assert_eq!(probe.state(), ProbeState::Exited);
}

#[test]
fn missing_binary_fails_to_launch() {
    let fixture = Fixture::new(GOOD_BEAT);
    let mut config = fixture.config();
    config.beat.command = fixture.path().join("bin/wikipediabeat");
    let mut probe = LivenessProbe::new(config).expect("create probe");

    let err = probe.run(&HashMap::new()).unwrap_err();

    assert!(
        matches!(
            err,
            ProbeError::LaunchError {
                source: LaunchError::Spawn(_),
                ..
            }
        ),
        "got {err:?}"
    );
    assert_eq!(probe.state(), ProbeState::NotStarted);
}

#[test]
fn readiness_can_watch_a_log_glob() {
    let fixture = Fixture::with_settings(
        FILE_LOGGING_BEAT,
        "readiness:\n  log: \"{{ working_dir }}/log/*\"\n  timeout: 5s\n",
    );
    let mut probe = LivenessProbe::new(fixture.config()).expect("create probe");

    let report = probe.run(&HashMap::new()).expect("probe run");

    assert_eq!(report.exit_code, 0);
    assert!(report.working_dir.join("log/wikipediabeat-1.log").is_file());
}

#[test]
fn malformed_template_fails_before_launch() {
    let fixture = Fixture::new(GOOD_BEAT);
    fs::write(
        fixture.path().join("wikipediabeat.yml.tmpl"),
        "name: {{ path \n",
    )
    .unwrap();
    let mut probe = LivenessProbe::new(fixture.config()).expect("create probe");

    let err = probe.run(&HashMap::new()).unwrap_err();

    assert!(matches!(err, ProbeError::ConfigRenderError(_)), "got {err:?}");
    assert_eq!(probe.state(), ProbeState::NotStarted);
    assert!(!probe.output_log().exists());
}

#[test]
fn rerunning_in_fresh_directories_is_idempotent() {
    let fixture = Fixture::new(GOOD_BEAT);
    let mut working_dirs = Vec::new();

    for _ in 0..2 {
        let mut probe = LivenessProbe::new(fixture.config()).expect("create probe");
        let report = probe.run(&HashMap::new()).expect("probe run");
        assert_eq!(report.exit_code, 0);
        working_dirs.push(report.working_dir);
    }

    assert_ne!(working_dirs[0], working_dirs[1]);
    assert!(working_dirs.iter().all(|dir| !dir.exists()));
}

#[test]
fn cancelling_while_waiting_for_ready_stops_the_beat() {
    let fixture = Fixture::with_settings(SILENT_BEAT, "readiness:\n  timeout: 30s\n");
    let cancel = Arc::new(AtomicBool::new(false));
    let mut probe = LivenessProbe::new(fixture.config())
        .expect("create probe")
        .with_cancel(cancel.clone());

    probe.render_config(&HashMap::new()).expect("render config");
    let pid = probe.start_process().expect("start beat");
    assert!(is_process_alive(pid));

    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        cancel.store(true, Ordering::SeqCst);
    });
    let err = probe.wait_for_ready().unwrap_err();
    trigger.join().unwrap();
    assert!(matches!(err, ProbeError::Interrupted), "got {err:?}");

    drop(probe);
    assert!(!is_process_alive(pid));
}

#[test]
fn oversized_ready_timeout_does_not_overflow() {
    let fixture = Fixture::with_settings(
        GOOD_BEAT,
        "readiness:\n  timeout: 18446744073709551615\n",
    );
    let mut probe = LivenessProbe::new(fixture.config()).expect("create probe");

    let report = probe.run(&HashMap::new()).expect("probe run");
    assert_eq!(report.exit_code, 0);
}
