use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

use schedsh::error::ShellError;
use schedsh::submit;
use schedsh::table::{now_us, JobRecord, SharedTable};

fn test_name(tag: &str) -> String {
    format!("/schedsh-submit-test-{}-{tag}", std::process::id())
}

fn append_line(table: &SharedTable, line: &str) -> usize {
    table
        .with_guard(|t| t.append(JobRecord::new(line, now_us())))
        .unwrap()
        .unwrap()
}

#[test]
fn test_submit_each_valid_priority() {
    for priority in 1..=4i32 {
        let table = SharedTable::create(&test_name(&format!("p{priority}")), 8, 1, 10).unwrap();
        let line = format!("submit /bin/sleep 30 {priority}");
        let index = append_line(&table, &line);

        let pid = submit::submit(&table, index, &line).unwrap();
        assert!(pid.as_raw() > 0);

        table
            .with_guard(|t| {
                let rec = t.get(index).unwrap();
                assert_eq!(rec.pid, pid.as_raw());
                assert_eq!(rec.priority, priority);
                assert!(rec.submitted);
                assert!(!rec.queued);
                assert!(!rec.completed);
            })
            .unwrap();

        // the handoff leaves the child suspended, not running and not dead
        let status = waitpid(pid, Some(WaitPidFlag::WUNTRACED)).unwrap();
        assert_eq!(status, WaitStatus::Stopped(pid, Signal::SIGSTOP));

        kill(pid, Signal::SIGKILL).unwrap();
        waitpid(pid, None).unwrap();
    }
}

#[test]
fn test_submit_default_priority() {
    let table = SharedTable::create(&test_name("default"), 8, 1, 10).unwrap();
    let line = "submit /bin/sleep 30";
    let index = append_line(&table, line);

    let pid = submit::submit(&table, index, line).unwrap();
    table
        .with_guard(|t| assert_eq!(t.get(index).unwrap().priority, 1))
        .unwrap();

    kill(pid, Signal::SIGKILL).unwrap();
    waitpid(pid, None).unwrap();
}

#[test]
fn test_submit_invalid_priority_creates_no_process() {
    let table = SharedTable::create(&test_name("invalid"), 8, 1, 10).unwrap();
    let line = "submit /bin/sleep 30 9";
    let index = append_line(&table, line);

    let err = submit::submit(&table, index, line).unwrap_err();
    assert!(matches!(err, ShellError::UserInput(_)));

    table
        .with_guard(|t| {
            let rec = t.get(index).unwrap();
            assert!(rec.submitted);
            assert!(rec.completed);
            assert_eq!(rec.pid, -1);
        })
        .unwrap();
}

#[test]
fn test_rejected_submission_stays_completed() {
    let table = SharedTable::create(&test_name("sticky"), 8, 1, 10).unwrap();
    let line = "submit ./job 0";
    let index = append_line(&table, line);
    submit::submit(&table, index, line).unwrap_err();

    // unrelated table traffic leaves the rejection in place
    append_line(&table, "history");
    table
        .with_guard(|t| {
            assert_eq!(t.len(), 2);
            assert!(t.get(index).unwrap().completed);
        })
        .unwrap();
}
