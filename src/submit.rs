//! The submission protocol: turn a `submit` line into a suspended,
//! priority-tagged process the external scheduler can admit.
//!
//! The handoff boundary is a stopped process with a populated table entry:
//! once `submit` returns, the record carries the pid, priority and command
//! and the process is waiting in `SIGSTOP` for the scheduler's `SIGCONT`.

use std::ffi::CString;

use nix::sys::signal::{kill, Signal};
use nix::unistd::{fork, ForkResult, Pid};

use crate::error::{Result, ShellError};
use crate::table::{now_us, SharedTable, MAX_PRIORITY, MIN_PRIORITY};

/// A parsed `submit` line: the job's argv and its priority tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub argv: Vec<String>,
    pub priority: i32,
}

/// Parse `submit <cmd> [args...] [priority]`.
///
/// A trailing bare integer is the priority only when at least one other
/// token follows the command word; `submit 3` runs a program named `3`.
/// An integer outside [1,4] rejects the whole line.
pub fn parse(line: &str) -> Result<Submission> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("submit") {
        return Err(ShellError::UserInput("not a submit line".into()));
    }
    let mut argv: Vec<String> = tokens.map(str::to_string).collect();
    if argv.is_empty() {
        return Err(ShellError::UserInput("submit: missing command".into()));
    }

    let mut priority = MIN_PRIORITY;
    if argv.len() > 1 {
        if let Ok(p) = argv[argv.len() - 1].parse::<i32>() {
            if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&p) {
                return Err(ShellError::UserInput(format!(
                    "submit: priority {p} outside [{MIN_PRIORITY},{MAX_PRIORITY}]"
                )));
            }
            priority = p;
            argv.pop();
        }
    }

    Ok(Submission { argv, priority })
}

/// Run the submission protocol against the record at `index`, which the
/// control loop appended for this line. Returns the suspended child's pid.
///
/// A rejected line marks the record submitted and completed and creates no
/// process. Fork failure is fatal; an exec failure is isolated to the child.
pub fn submit(table: &SharedTable, index: usize, line: &str) -> Result<Pid> {
    let submission = match parse(line) {
        Ok(s) => s,
        Err(err) => {
            table.with_guard(|t| {
                if let Some(rec) = t.get_mut(index) {
                    rec.submitted = true;
                    rec.completed = true;
                }
            })?;
            return Err(err);
        }
    };

    table.with_guard(|t| {
        if let Some(rec) = t.get_mut(index) {
            rec.submitted = true;
            rec.completed = false;
            rec.queued = false;
            rec.priority = submission.priority;
            rec.started_at_us = now_us();
        }
    })?;

    // Exec image prepared before the fork; the child may only make
    // async-signal-safe calls.
    let cstrings: Vec<CString> = submission
        .argv
        .iter()
        .map(|a| CString::new(a.as_str()))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| ShellError::Exec("argument contains a NUL byte".into()))?;
    let mut argv_ptrs: Vec<*const libc::c_char> = cstrings.iter().map(|c| c.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());
    let errmsg = format!("schedsh: {}: exec failed\n", submission.argv[0]).into_bytes();

    match unsafe { fork() } {
        Err(e) => Err(ShellError::Resource(format!("fork: {e}"))),
        Ok(ForkResult::Child) => unsafe {
            libc::execvp(argv_ptrs[0], argv_ptrs.as_ptr());
            libc::write(2, errmsg.as_ptr() as *const libc::c_void, errmsg.len());
            libc::_exit(127);
        },
        Ok(ForkResult::Parent { child }) => {
            // Handoff boundary: a stopped process with a populated entry is
            // what the scheduler admits.
            kill(child, Signal::SIGSTOP)
                .map_err(|e| ShellError::Resource(format!("kill(SIGSTOP, {child}): {e}")))?;
            table.with_guard(|t| {
                if let Some(rec) = t.get_mut(index) {
                    rec.pid = child.as_raw();
                }
            })?;
            tracing::info!(
                pid = %child,
                priority = submission.priority,
                command = line,
                "Job submitted and suspended"
            );
            Ok(child)
        }
    }
}
