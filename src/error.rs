use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShellError {
    /// Shared-region create/attach/destroy failure. Fatal: shared-state
    /// integrity cannot be assumed afterwards.
    #[error("shared region error: {0}")]
    Resource(String),

    /// Guard acquire/release failure. Fatal for the same reason.
    #[error("guard error: {0}")]
    Sync(String),

    /// Bad input on the current line. Reported and the loop continues.
    #[error("{0}")]
    UserInput(String),

    /// A command could not be started. Isolated to the failing process.
    #[error("exec failed: {0}")]
    Exec(String),

    /// Append rejected: the history table is at capacity.
    #[error("history table full (capacity {0})")]
    TableFull(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShellError {
    /// Errors after which the shared state can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShellError::Resource(_) | ShellError::Sync(_))
    }
}

pub type Result<T> = std::result::Result<T, ShellError>;
