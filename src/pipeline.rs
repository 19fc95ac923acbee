//! Multi-stage process pipelines: split a command line on `|`, wire the
//! stages together with pipes, and either wait for the whole pipeline or
//! detach it into the background.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult, Pid};

use crate::error::{Result, ShellError};

/// Hard cap on pipeline stages; exceeding it rejects the line before any
/// process is created.
pub const MAX_STAGES: usize = 5;

/// Hard cap on argv tokens per stage.
pub const MAX_STAGE_ARGS: usize = 10;

/// A parsed pipeline: one argv per stage, plus the background marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Vec<String>>,
    background: bool,
}

/// What a pipeline run left behind for the history record.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub last_pid: Pid,
    pub detached: bool,
}

impl Pipeline {
    /// Split on `|` and whitespace, enforcing the stage and argument caps.
    /// A trailing `&` on the final stage detaches the whole pipeline.
    pub fn parse(line: &str) -> Result<Self> {
        let mut stages: Vec<&str> = line.split('|').map(str::trim).collect();
        if stages.len() > MAX_STAGES {
            return Err(ShellError::UserInput(format!(
                "pipeline has {} stages, at most {MAX_STAGES} are supported",
                stages.len()
            )));
        }

        let mut background = false;
        if let Some(last) = stages.last_mut() {
            if let Some(stripped) = last.strip_suffix('&') {
                background = true;
                *last = stripped.trim_end();
            }
        }

        let mut parsed = Vec::with_capacity(stages.len());
        for stage in &stages {
            let argv: Vec<String> = stage.split_whitespace().map(str::to_string).collect();
            if argv.is_empty() {
                return Err(ShellError::UserInput("empty pipeline stage".into()));
            }
            if argv.len() > MAX_STAGE_ARGS {
                return Err(ShellError::UserInput(format!(
                    "stage '{stage}' has {} arguments, at most {MAX_STAGE_ARGS} are supported",
                    argv.len()
                )));
            }
            parsed.push(argv);
        }

        Ok(Self {
            stages: parsed,
            background,
        })
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn is_background(&self) -> bool {
        self.background
    }

    /// Fork and exec every stage, stdout of stage i feeding stdin of stage
    /// i+1. Foreground pipelines wait for every stage and report abnormal
    /// exits; detached pipelines report the final pid and the command line.
    pub fn run(&self, line: &str) -> Result<PipelineOutcome> {
        // Exec images prepared before any fork; between fork and exec the
        // child may only make async-signal-safe calls.
        let mut images: Vec<(Vec<CString>, Vec<u8>)> = Vec::with_capacity(self.stages.len());
        for argv in &self.stages {
            let cstrings: Vec<CString> = argv
                .iter()
                .map(|a| CString::new(a.as_str()))
                .collect::<std::result::Result<_, _>>()
                .map_err(|_| ShellError::Exec("argument contains a NUL byte".into()))?;
            let errmsg = format!("schedsh: {}: exec failed\n", argv[0]).into_bytes();
            images.push((cstrings, errmsg));
        }
        let argv_ptrs: Vec<Vec<*const libc::c_char>> = images
            .iter()
            .map(|(cstrings, _)| {
                let mut ptrs: Vec<*const libc::c_char> =
                    cstrings.iter().map(|c| c.as_ptr()).collect();
                ptrs.push(std::ptr::null());
                ptrs
            })
            .collect();

        let n = self.stages.len();
        let mut pids: Vec<Pid> = Vec::with_capacity(n);
        let mut prev_read: Option<OwnedFd> = None;
        for i in 0..n {
            let pipe_pair = if i < n - 1 {
                Some(pipe().map_err(|e| ShellError::Resource(format!("pipe: {e}")))?)
            } else {
                None
            };

            match unsafe { fork() }.map_err(|e| ShellError::Resource(format!("fork: {e}")))? {
                ForkResult::Child => unsafe {
                    if let Some(read_end) = &prev_read {
                        libc::dup2(read_end.as_raw_fd(), libc::STDIN_FILENO);
                        libc::close(read_end.as_raw_fd());
                    }
                    if let Some((read_end, write_end)) = &pipe_pair {
                        libc::close(read_end.as_raw_fd());
                        libc::dup2(write_end.as_raw_fd(), libc::STDOUT_FILENO);
                        libc::close(write_end.as_raw_fd());
                    }
                    libc::execvp(argv_ptrs[i][0], argv_ptrs[i].as_ptr());
                    let (_, errmsg) = &images[i];
                    libc::write(2, errmsg.as_ptr() as *const libc::c_void, errmsg.len());
                    libc::_exit(127);
                },
                ForkResult::Parent { child } => {
                    pids.push(child);
                    prev_read = match pipe_pair {
                        Some((read_end, write_end)) => {
                            drop(write_end);
                            Some(read_end)
                        }
                        None => None,
                    };
                }
            }
        }

        let last_pid = pids[n - 1];
        if self.background {
            println!("{last_pid} {line}");
            tracing::debug!(pid = %last_pid, command = line, "Pipeline detached");
            return Ok(PipelineOutcome {
                last_pid,
                detached: true,
            });
        }

        for pid in &pids {
            loop {
                match waitpid(*pid, None) {
                    Ok(WaitStatus::Exited(_, _)) => break,
                    Ok(WaitStatus::Signaled(p, sig, _)) => {
                        eprintln!("schedsh: pipeline stage {p} killed by {sig}");
                        break;
                    }
                    Ok(_) => break,
                    Err(nix::errno::Errno::EINTR) => continue,
                    Err(e) => {
                        eprintln!("schedsh: waitpid({pid}): {e}");
                        break;
                    }
                }
            }
        }
        tracing::debug!(pid = %last_pid, stages = n, command = line, "Pipeline finished");

        Ok(PipelineOutcome {
            last_pid,
            detached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_stage() {
        let p = Pipeline::parse("echo hello").unwrap();
        assert_eq!(p.stage_count(), 1);
        assert!(!p.is_background());
        assert_eq!(p.stages[0], vec!["echo", "hello"]);
    }

    #[test]
    fn parse_multi_stage() {
        let p = Pipeline::parse("cat notes.txt | grep todo | wc -l").unwrap();
        assert_eq!(p.stage_count(), 3);
        assert_eq!(p.stages[2], vec!["wc", "-l"]);
    }

    #[test]
    fn parse_background_marker_is_stripped() {
        let p = Pipeline::parse("sleep 5 &").unwrap();
        assert!(p.is_background());
        assert_eq!(p.stages[0], vec!["sleep", "5"]);

        let joined = Pipeline::parse("sleep 5&").unwrap();
        assert!(joined.is_background());
        assert_eq!(joined.stages[0], vec!["sleep", "5"]);
    }

    #[test]
    fn parse_rejects_six_stages() {
        let line = "a | b | c | d | e | f";
        assert!(matches!(
            Pipeline::parse(line),
            Err(ShellError::UserInput(_))
        ));
    }

    #[test]
    fn parse_accepts_five_stages() {
        let p = Pipeline::parse("a | b | c | d | e").unwrap();
        assert_eq!(p.stage_count(), MAX_STAGES);
    }

    #[test]
    fn parse_rejects_empty_stage() {
        assert!(matches!(
            Pipeline::parse("echo hi || wc"),
            Err(ShellError::UserInput(_))
        ));
        assert!(matches!(
            Pipeline::parse("echo hi |"),
            Err(ShellError::UserInput(_))
        ));
    }

    #[test]
    fn parse_rejects_too_many_arguments() {
        let line = "prog a b c d e f g h i j";
        assert!(matches!(
            Pipeline::parse(line),
            Err(ShellError::UserInput(_))
        ));
    }
}
