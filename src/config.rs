use std::path::PathBuf;

/// Default number of history records a session's shared table can hold.
pub const DEFAULT_HISTORY_CAPACITY: u32 = 100;

/// Runtime configuration for one shell session.
///
/// `ncpu` and `tslice_ms` are written into the shared table at creation and
/// are read-only afterwards; the external scheduler reads them from there,
/// not from its own command line.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Number of cpus the external scheduler may schedule onto.
    pub ncpu: u32,
    /// Scheduler time-slice unit in milliseconds.
    pub tslice_ms: u32,
    /// Capacity of the shared history table.
    pub history_capacity: u32,
    /// Name of the POSIX shared memory object backing the table.
    pub shm_name: String,
    /// Path to the external scheduler binary. `None` runs the shell
    /// standalone: submitted jobs are created and suspended but nothing
    /// resumes them.
    pub scheduler_path: Option<PathBuf>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            ncpu: 1,
            tslice_ms: 100,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            shm_name: default_shm_name(),
            scheduler_path: Some(PathBuf::from("./scheduler")),
        }
    }
}

impl ShellConfig {
    pub fn new(ncpu: u32, tslice_ms: u32) -> Self {
        Self {
            ncpu,
            tslice_ms,
            ..Default::default()
        }
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_shm_name(mut self, name: impl Into<String>) -> Self {
        self.shm_name = name.into();
        self
    }

    /// Run without an external scheduler process.
    pub fn standalone(mut self) -> Self {
        self.scheduler_path = None;
        self
    }
}

/// Session-unique shared memory object name, so concurrent shells on one
/// host do not attach to each other's tables.
pub fn default_shm_name() -> String {
    format!("/schedsh-{}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = ShellConfig::default();
        assert_eq!(cfg.ncpu, 1);
        assert_eq!(cfg.tslice_ms, 100);
        assert_eq!(cfg.history_capacity, DEFAULT_HISTORY_CAPACITY);
        assert!(cfg.scheduler_path.is_some());
    }

    #[test]
    fn shm_name_is_session_unique() {
        let cfg = ShellConfig::new(2, 50);
        assert!(cfg.shm_name.starts_with('/'));
        assert!(cfg.shm_name.contains(&std::process::id().to_string()));
    }

    #[test]
    fn standalone_clears_scheduler_path() {
        let cfg = ShellConfig::new(2, 50).standalone();
        assert!(cfg.scheduler_path.is_none());
    }

    #[test]
    fn builders_override_defaults() {
        let cfg = ShellConfig::new(4, 25)
            .with_capacity(8)
            .with_shm_name("/schedsh-test");
        assert_eq!(cfg.ncpu, 4);
        assert_eq!(cfg.tslice_ms, 25);
        assert_eq!(cfg.history_capacity, 8);
        assert_eq!(cfg.shm_name, "/schedsh-test");
    }
}
