#[path = "common/mod.rs"]
mod common;

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use beatprobe::{
    error::ProbeError,
    probe::{LivenessProbe, ProbeState},
};
use common::{DIRTY_STOP_BEAT, Fixture, STUBBORN_BEAT, is_process_alive};

#[test]
fn beat_ignoring_sigterm_is_force_killed() {
    let fixture = Fixture::with_settings(STUBBORN_BEAT, "shutdown:\n  grace: 300ms\n");
    let mut probe = LivenessProbe::new(fixture.config()).expect("create probe");
    probe.render_config(&HashMap::new()).expect("render config");
    let pid = probe.start_process().expect("start beat");
    probe.wait_for_ready().expect("beat never became ready");

    let started = Instant::now();
    let err = probe.kill_and_wait().unwrap_err();

    match err {
        ProbeError::ProcessWaitError { pid: reported, grace, .. } => {
            assert_eq!(reported, pid);
            assert_eq!(grace, Duration::from_millis(300));
        }
        other => panic!("expected ProcessWaitError, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(probe.state(), ProbeState::Exited);
    assert!(!is_process_alive(pid));
}

#[test]
fn non_zero_exit_after_sigterm_fails_the_run() {
    let fixture = Fixture::new(DIRTY_STOP_BEAT);
    let mut probe = LivenessProbe::new(fixture.config()).expect("create probe");

    let err = probe.run(&HashMap::new()).unwrap_err();

    match err {
        ProbeError::UnexpectedExitCode {
            expected, actual, ..
        } => {
            assert_eq!(expected, 0);
            assert_eq!(actual, 3);
        }
        other => panic!("expected UnexpectedExitCode, got {other:?}"),
    }
}

#[test]
fn expected_exit_code_is_configurable() {
    // No trap: the shell dies from SIGTERM itself, which reads as 128 + 15.
    let script = "echo \"wikipediabeat is running\"\nwhile true; do sleep 0.05; done\n";
    let fixture =
        Fixture::with_settings(script, "shutdown:\n  expected_exit_code: 143\n");
    let mut probe = LivenessProbe::new(fixture.config()).expect("create probe");

    let report = probe.run(&HashMap::new()).expect("probe run");

    assert_eq!(report.exit_code, 143);
    assert_eq!(report.exit.signal, Some(15));
}

#[test]
fn kill_is_only_allowed_once() {
    let fixture = Fixture::new(common::GOOD_BEAT);
    let mut probe = LivenessProbe::new(fixture.config()).expect("create probe");
    probe.run(&HashMap::new()).expect("probe run");

    assert!(matches!(
        probe.kill_and_wait(),
        Err(ProbeError::InvalidState {
            state: "exited",
            ..
        })
    ));
}
