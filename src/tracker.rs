//! Completion bookkeeping driven by child-termination notifications.
//!
//! The tracker is the single lock acquirer besides the control loop. It runs
//! as a `SIGCHLD` handler, so it can preempt the loop at arbitrary
//! granularity: it always takes the guard itself, touches only the shared
//! table, and never re-enters normal request paths. Terminations reported
//! with the scheduler's own pid are ignored.

use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicPtr, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;

use crate::error::{Result, ShellError};
use crate::table::{self, SharedTable, TableHeader};

static TABLE: AtomicPtr<TableHeader> = AtomicPtr::new(ptr::null_mut());
static SCHEDULER_PID: AtomicI32 = AtomicI32::new(-1);

/// Install the `SIGCHLD` handler and publish the table pointer and the
/// scheduler's pid for it. `SA_NOCLDSTOP` keeps job suspensions and resumes
/// from looking like terminations.
pub fn install(table: &SharedTable, scheduler_pid: Option<Pid>) -> Result<()> {
    TABLE.store(table.header_ptr(), Ordering::SeqCst);
    SCHEDULER_PID.store(scheduler_pid.map_or(-1, Pid::as_raw), Ordering::SeqCst);

    let action = SigAction::new(
        SigHandler::SigAction(on_sigchld),
        SaFlags::SA_SIGINFO | SaFlags::SA_NOCLDSTOP | SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGCHLD, &action) }
        .map_err(|e| ShellError::Resource(format!("sigaction(SIGCHLD): {e}")))?;
    Ok(())
}

/// Restore the default disposition and unpublish the table pointer. Must run
/// before the table is destroyed; afterwards late notifications are dropped
/// by the kernel, not by a handler reading freed memory.
pub fn disarm() {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    let _ = unsafe { sigaction(Signal::SIGCHLD, &action) };
    TABLE.store(ptr::null_mut(), Ordering::SeqCst);
}

extern "C" fn on_sigchld(
    _signo: libc::c_int,
    info: *mut libc::siginfo_t,
    _ctx: *mut libc::c_void,
) {
    if info.is_null() {
        return;
    }
    let pid = unsafe { (*info).si_pid() };
    if pid == SCHEDULER_PID.load(Ordering::SeqCst) {
        return;
    }
    let header = TABLE.load(Ordering::SeqCst);
    if header.is_null() {
        return;
    }
    unsafe { table::complete_raw(header, pid, table::now_us()) };
}
