use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;

use schedsh::error::ShellError;
use schedsh::pipeline::{Pipeline, MAX_STAGES};

#[test]
fn test_six_stage_pipeline_rejected_before_fork() {
    let line = "a | b | c | d | e | f";
    assert!(matches!(
        Pipeline::parse(line),
        Err(ShellError::UserInput(_))
    ));
}

#[test]
fn test_five_stage_pipeline_accepted() {
    let p = Pipeline::parse("a | b | c | d | e").unwrap();
    assert_eq!(p.stage_count(), MAX_STAGES);
}

#[test]
fn test_foreground_pipeline_blocks_until_exit() {
    let line = "/bin/sleep 0.3";
    let p = Pipeline::parse(line).unwrap();

    let started = Instant::now();
    let outcome = p.run(line).unwrap();

    assert!(started.elapsed() >= Duration::from_millis(250));
    assert!(!outcome.detached);
    assert!(outcome.last_pid.as_raw() > 0);
}

#[test]
fn test_multi_stage_pipeline_runs_to_completion() {
    let line = "echo hello | cat | cat";
    let p = Pipeline::parse(line).unwrap();
    assert_eq!(p.stage_count(), 3);

    let outcome = p.run(line).unwrap();
    assert!(!outcome.detached);
}

#[test]
fn test_background_pipeline_detaches() {
    let line = "/bin/sleep 5 &";
    let p = Pipeline::parse(line).unwrap();
    assert!(p.is_background());

    let started = Instant::now();
    let outcome = p.run(line).unwrap();
    assert!(outcome.detached);
    assert!(started.elapsed() < Duration::from_secs(2));

    kill(outcome.last_pid, Signal::SIGKILL).unwrap();
    waitpid(outcome.last_pid, None).unwrap();
}

#[test]
fn test_unresolvable_stage_is_isolated() {
    // the failing exec is confined to the child; the shell side returns
    let line = "definitely-not-a-command-zzz";
    let p = Pipeline::parse(line).unwrap();
    let outcome = p.run(line).unwrap();
    assert!(!outcome.detached);
}
