//! Handle to the external scheduler process, and the contract it serves.
//!
//! The scheduler's admission, priority and time-slice logic live in a
//! separate binary; this core's responsibility ends at "suspended process
//! plus tagged metadata visible in shared state". The contract:
//!
//! - The shell spawns the scheduler with the shared region name as its only
//!   argument; the scheduler attaches with [`crate::table::SharedTable::attach`]
//!   and reads `ncpu` and the time-slice unit from the table header.
//! - It discovers work by scanning, under the guard, for records with
//!   `submitted` set and `completed` clear; such a record's process was left
//!   stopped by the submission handoff.
//! - It admits and resumes jobs per its own policy (`SIGCONT`), and owns the
//!   `queued`, `wait_ms` and `vruntime` record fields. Polling cadence and
//!   queueing discipline are its business, not specified here.
//! - On `SIGTERM` it detaches and exits.
//!
//! Everything crosses through the table or a signal; the shell never calls
//! into the scheduler.

use std::ffi::CString;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult, Pid};

use crate::error::{Result, ShellError};

/// A running external scheduler process.
#[derive(Debug)]
pub struct SchedulerHandle {
    pid: Pid,
}

impl SchedulerHandle {
    /// Fork and exec the scheduler binary, passing the shared region name.
    ///
    /// Fork failure is fatal. An exec failure is isolated to the child and
    /// surfaces as an early scheduler death, which the completion tracker
    /// ignores because the pid matches.
    pub fn spawn(path: &Path, shm_name: &str) -> Result<Self> {
        let prog = CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| ShellError::Exec("scheduler path contains a NUL byte".into()))?;
        let arg = CString::new(shm_name)
            .map_err(|_| ShellError::Exec("shm name contains a NUL byte".into()))?;
        let argv = [prog.as_ptr(), arg.as_ptr(), std::ptr::null()];
        let errmsg =
            format!("schedsh: {}: could not start scheduler\n", path.display()).into_bytes();

        match unsafe { fork() } {
            Err(e) => Err(ShellError::Resource(format!("fork: {e}"))),
            Ok(ForkResult::Child) => unsafe {
                libc::execvp(prog.as_ptr(), argv.as_ptr());
                libc::write(2, errmsg.as_ptr() as *const libc::c_void, errmsg.len());
                libc::_exit(127);
            },
            Ok(ForkResult::Parent { child }) => {
                tracing::info!(pid = %child, path = %path.display(), "Scheduler spawned");
                Ok(Self { pid: child })
            }
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Forward a termination signal and reap. Tolerates a scheduler that is
    /// already gone.
    pub fn terminate(self) -> Result<()> {
        match kill(self.pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                return Err(ShellError::Resource(format!(
                    "kill(SIGTERM, {}): {e}",
                    self.pid
                )))
            }
        }
        match waitpid(self.pid, None) {
            Ok(status) => {
                tracing::info!(pid = %self.pid, ?status, "Scheduler terminated");
                Ok(())
            }
            Err(Errno::ECHILD) => Ok(()),
            Err(e) => Err(ShellError::Resource(format!("waitpid({}): {e}", self.pid))),
        }
    }
}
