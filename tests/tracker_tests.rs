//! End-to-end completion bookkeeping: a submitted job is resumed, runs to
//! termination, and the SIGCHLD tracker finalizes its record.
//!
//! Signal dispositions are process-global, so everything lives in a single
//! test function.

use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;

use schedsh::submit;
use schedsh::table::{now_us, JobRecord, SharedTable};
use schedsh::tracker;

fn append_line(table: &SharedTable, line: &str) -> usize {
    table
        .with_guard(|t| t.append(JobRecord::new(line, now_us())))
        .unwrap()
        .unwrap()
}

fn wait_for_completion(table: &SharedTable, index: usize, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let completed = table
            .with_guard(|t| t.get(index).unwrap().completed)
            .unwrap();
        if completed {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Keep SIGCHLD away from the calling thread. The shell proper is
/// single-threaded, but the test harness is not: if the handler interrupted
/// this thread while it holds the guard it would self-deadlock. Masked here,
/// delivery lands on another thread where semaphore contention just blocks.
fn mask_sigchld_on_this_thread() {
    let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGCHLD);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }
}

#[test]
fn test_tracker_finalizes_resumed_job() {
    mask_sigchld_on_this_thread();

    let name = format!("/schedsh-tracker-test-{}", std::process::id());
    let table = SharedTable::create(&name, 8, 1, 10).unwrap();

    // no scheduler process in this test; pid 1 can never be a child of ours
    tracker::install(&table, Some(Pid::from_raw(1))).unwrap();

    let line = "submit /bin/true";
    let index = append_line(&table, line);
    let pid = submit::submit(&table, index, line).unwrap();

    // play the scheduler: admit the suspended job
    kill(pid, Signal::SIGCONT).unwrap();

    assert!(
        wait_for_completion(&table, index, Duration::from_secs(5)),
        "tracker never finalized the record"
    );
    table
        .with_guard(|t| {
            let rec = t.get(index).unwrap();
            assert_eq!(rec.pid, pid.as_raw());
            assert!(rec.submitted);
            assert!(rec.completed);
        })
        .unwrap();
    // the tracker only bookkeeps; the zombie is still ours to reap
    waitpid(pid, None).unwrap();

    // a termination reported with the scheduler's own pid is ignored: make
    // the next child *be* the "scheduler"
    let line2 = "submit /bin/true";
    let index2 = append_line(&table, line2);
    let pid2 = submit::submit(&table, index2, line2).unwrap();
    tracker::install(&table, Some(pid2)).unwrap();

    kill(pid2, Signal::SIGCONT).unwrap();
    waitpid(pid2, None).unwrap();
    assert!(
        !wait_for_completion(&table, index2, Duration::from_millis(200)),
        "tracker should ignore the scheduler's pid"
    );

    tracker::disarm();
}
