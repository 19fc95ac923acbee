//! The interactive control loop: prompt, read, dispatch, record.
//!
//! Every non-empty, non-exit line appends exactly one record to the shared
//! table before it is dispatched. Non-submissions have their execution time
//! finalized synchronously when the dispatch returns; submissions are
//! finalized asynchronously by the completion tracker.

use std::io::{self, Write};

use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::shutdown;
use crate::submit;
use crate::table::{elapsed_ms, now_us, JobRecord, SharedTable};

/// Longest accepted input line, terminator excluded.
pub const MAX_LINE_BYTES: usize = 1024;

const PROMPT: &str = "schedsh> ";

pub struct Shell<'a> {
    table: &'a SharedTable,
}

impl<'a> Shell<'a> {
    pub fn new(table: &'a SharedTable) -> Self {
        Self { table }
    }

    /// Drive PROMPT → READ → DISPATCH → RECORD until `exit`, end of input
    /// or an interrupt. Fatal errors propagate; everything else is reported
    /// and the loop continues.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if shutdown::shutdown_requested() {
                println!();
                break;
            }
            print!("{PROMPT}");
            io::stdout().flush()?;

            let line = match read_line() {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    // a broken stdin is the end of the session, not a retry
                    eprintln!("schedsh: {err}");
                    break;
                }
            };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if line == "exit" {
                break;
            }

            let index = match self
                .table
                .with_guard(|t| t.append(JobRecord::new(&line, now_us())))?
            {
                Ok(index) => index,
                Err(err) => {
                    // Rejected append: no process may be created for this line.
                    eprintln!("schedsh: {err}");
                    continue;
                }
            };

            let is_submission = match self.dispatch(&line, index) {
                Ok(is_submission) => is_submission,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    eprintln!("schedsh: {err}");
                    false
                }
            };

            if !is_submission {
                self.table.with_guard(|t| {
                    if let Some(rec) = t.get_mut(index) {
                        rec.execution_ms = elapsed_ms(rec.started_at_us, now_us());
                    }
                })?;
            }
        }

        self.print_history()?;
        Ok(())
    }

    /// Returns true when the line was a submission, whose timing the
    /// completion tracker finalizes later.
    fn dispatch(&mut self, line: &str, index: usize) -> Result<bool> {
        match line {
            "history" => {
                self.print_history()?;
                Ok(false)
            }
            "jobs" => {
                self.print_jobs()?;
                Ok(false)
            }
            _ if line.split_whitespace().next() == Some("submit") => {
                submit::submit(self.table, index, line).map(|_| true)
            }
            _ => {
                let pipeline = Pipeline::parse(line)?;
                let outcome = pipeline.run(line)?;
                self.table.with_guard(|t| {
                    if let Some(rec) = t.get_mut(index) {
                        rec.pid = outcome.last_pid.as_raw();
                    }
                })?;
                Ok(false)
            }
        }
    }

    /// `history` built-in, also the shutdown report.
    fn print_history(&self) -> Result<()> {
        self.table.with_guard(|t| {
            if t.is_empty() {
                println!("No commands in history.");
                return;
            }
            println!(
                "{:<4} {:<26} {:>8} {:>10} {:>10}",
                "NO", "COMMAND", "PID", "EXEC(ms)", "WAIT(ms)"
            );
            println!("{}", "-".repeat(62));
            for (i, rec) in t.records().iter().enumerate() {
                println!(
                    "{:<4} {:<26} {:>8} {:>10} {:>10}",
                    i + 1,
                    display_command(&rec.command()),
                    rec.pid,
                    rec.execution_ms,
                    rec.wait_ms
                );
            }
        })
    }

    /// `jobs` built-in: submitted, not-yet-completed records.
    fn print_jobs(&self) -> Result<()> {
        self.table.with_guard(|t| {
            for rec in t.records().iter().filter(|r| r.submitted && !r.completed) {
                println!("{}\t{}\t{}", rec.pid, rec.priority, rec.command());
            }
        })
    }
}

fn display_command(command: &str) -> String {
    if command.len() > 26 {
        let mut cut = 23;
        while !command.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &command[..cut])
    } else {
        command.to_string()
    }
}

/// Read one line from stdin with a raw `read(2)` loop, so an interrupt
/// surfaces as `EINTR` instead of being swallowed by a restarting buffered
/// reader. Returns `None` on end of input or a pending shutdown.
fn read_line() -> Result<Option<String>> {
    let mut line: Vec<u8> = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = unsafe { libc::read(libc::STDIN_FILENO, byte.as_mut_ptr().cast(), 1) };
        match n {
            1 => {
                if byte[0] == b'\n' {
                    break;
                }
                if line.len() < MAX_LINE_BYTES {
                    line.push(byte[0]);
                }
            }
            0 => {
                if line.is_empty() {
                    return Ok(None);
                }
                break;
            }
            _ => {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    if shutdown::shutdown_requested() {
                        return Ok(None);
                    }
                    continue;
                }
                return Err(err.into());
            }
        }
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}
