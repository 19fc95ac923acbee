use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{Result, ShellError};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Install a `SIGINT` handler that requests graceful shutdown.
///
/// The handler only latches a flag. `SA_RESTART` is deliberately absent so a
/// blocking stdin read returns `EINTR` and the control loop can take the
/// same path as `exit`: print the shared history, terminate the scheduler,
/// release the table.
pub fn install_shutdown_handler() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGINT, &action) }
        .map_err(|e| ShellError::Resource(format!("sigaction(SIGINT): {e}")))?;
    Ok(())
}

/// True once an interrupt has been received.
pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

extern "C" fn on_sigint(_signo: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}
