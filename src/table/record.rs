use std::fmt;

/// Command text stored per record, NUL terminator included.
pub const MAX_COMMAND_BYTES: usize = 64;

/// Inclusive priority range accepted by `submit`.
pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 4;

/// One entry of the shared history table.
///
/// The layout is part of the cross-process contract: the record sits inside
/// a `MAP_SHARED` region observed by the shell, the external scheduler and
/// the completion tracker, so it is `#[repr(C)]` plain data. Flags are one
/// byte each; `vruntime`, `queued` and `wait_ms` are written by the
/// scheduler only.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct JobRecord {
    /// Pid of the process created for this record, -1 while none exists.
    pub pid: i32,
    /// Submission priority in [1,4]; 0 for non-submitted commands.
    pub priority: i32,
    pub submitted: bool,
    pub queued: bool,
    pub completed: bool,
    command: [u8; MAX_COMMAND_BYTES],
    /// Wall-clock microseconds when the record was appended (re-stamped at
    /// submission handoff).
    pub started_at_us: i64,
    pub execution_ms: u64,
    pub wait_ms: u64,
    /// Scheduler-owned virtual-runtime accounting. Opaque to the shell.
    pub vruntime: u64,
}

impl JobRecord {
    /// Fresh record for one input line: no process, no priority, timing
    /// started now. Command text longer than the slot is truncated.
    pub fn new(command: &str, started_at_us: i64) -> Self {
        let mut rec = Self {
            pid: -1,
            priority: 0,
            submitted: false,
            queued: false,
            completed: false,
            command: [0; MAX_COMMAND_BYTES],
            started_at_us,
            execution_ms: 0,
            wait_ms: 0,
            vruntime: 0,
        };
        rec.set_command(command);
        rec
    }

    pub fn set_command(&mut self, command: &str) {
        self.command = [0; MAX_COMMAND_BYTES];
        let n = command.len().min(MAX_COMMAND_BYTES - 1);
        self.command[..n].copy_from_slice(&command.as_bytes()[..n]);
    }

    /// Command text up to the first NUL. Lossy: a truncation may split a
    /// multi-byte character.
    pub fn command(&self) -> String {
        let end = self
            .command
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_COMMAND_BYTES);
        String::from_utf8_lossy(&self.command[..end]).into_owned()
    }
}

impl fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRecord")
            .field("pid", &self.pid)
            .field("priority", &self.priority)
            .field("submitted", &self.submitted)
            .field("queued", &self.queued)
            .field("completed", &self.completed)
            .field("command", &self.command())
            .field("execution_ms", &self.execution_ms)
            .field("wait_ms", &self.wait_ms)
            .field("vruntime", &self.vruntime)
            .finish()
    }
}

/// Wall-clock microseconds. Backed by `clock_gettime`, which is
/// async-signal-safe, so the completion tracker can share it.
pub fn now_us() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    ts.tv_sec as i64 * 1_000_000 + ts.tv_nsec as i64 / 1_000
}

/// Whole milliseconds between a recorded start and `now_us`, saturating at
/// zero if the clock stepped backwards.
pub fn elapsed_ms(started_at_us: i64, now_us: i64) -> u64 {
    (now_us - started_at_us).max(0) as u64 / 1_000
}
