//! Service Table: fixed-capacity registry of service definitions plus their
//! runtime fields, keyed by name with stable indices.

use std::sync::atomic::AtomicBool;

use crate::constants::MAX_NUM_SERVICES;
use crate::error::ConfigError;

/// What a service directory represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// No `run` file; exists only to aggregate dependencies. Never executed.
    Group,
    /// Disabled via the `disabled` value file; loaded but never started.
    Disabled,
    /// Has an executable `run` file and participates in the supervisor loop.
    Runnable,
}

/// A single `KEY=VALUE` environment entry, validated against
/// `[A-Za-z_][A-Za-z0-9_]*` at load time.
pub type EnvEntry = (String, String);

/// Immutable-after-load service definition.
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    /// Unique name, ≤ [`crate::constants::MAX_SERVICE_NAME_LEN`] bytes.
    pub name: String,
    /// Group / Disabled / Runnable.
    pub kind: ServiceKind,
    /// Canonical path to the executable, for runnable services.
    pub run_path: Option<std::path::PathBuf>,
    /// Service directory, used as the working directory for hook execution.
    pub service_dir: std::path::PathBuf,
    /// Ordered argv (excluding argv[0]).
    pub params: Vec<String>,
    /// Ordered `KEY=VALUE` pairs. Empty means "inherit parent environment".
    pub environment: Vec<EnvEntry>,
    /// Resolved numeric uid.
    pub uid: u32,
    /// Resolved numeric gid.
    pub gid: u32,
    /// Supplementary group ids.
    pub sgid_list: Vec<u32>,
    /// File-creation mask.
    pub umask: u32,
    /// Scheduling niceness.
    pub priority: i32,
    /// Working directory applied after the credential change, if any.
    pub working_directory: Option<std::path::PathBuf>,
    /// Restart the service every time it exits.
    pub respawn: bool,
    /// Run to completion during startup before the next service proceeds.
    pub sync: bool,
    /// Don't fail startup (or trigger shutdown) if this service fails.
    pub ignore_failure: bool,
    /// When this service exits, request shutdown and propagate its exit code.
    pub shutdown_on_terminate: bool,
    /// Minimum time (ms) the service must stay up to count as started.
    pub min_running_time: u64,
    /// Time (ms) to wait for `is_ready` before declaring a startup failure.
    pub ready_timeout: u64,
    /// Seconds between re-launches; 0 disables interval scheduling.
    pub interval: u64,
    /// Whether the service directory has a `kill` hook.
    pub has_kill_hook: bool,
    /// Whether the service directory has an `is_ready` hook.
    pub has_is_ready_hook: bool,
    /// Whether the service directory has a `finish` hook.
    pub has_finish_hook: bool,
}

/// Runtime fields mutated only by the Supervisor thread.
#[derive(Debug)]
pub struct ServiceRuntime {
    /// 0 = not running, > 0 = live child pid.
    pub pid: i32,
    /// Monotonic millisecond timestamp of the most recent launch.
    pub start_time: u64,
    /// Master fd of the stdout pty, while running. Closed on reap.
    pub stdout_fd: Option<std::os::fd::OwnedFd>,
    /// Master fd of the stderr pty, while running. Closed on reap.
    pub stderr_fd: Option<std::os::fd::OwnedFd>,
    /// Set by the supervisor, observed by the logger thread, to request that
    /// the Output Multiplexer stop reading and exit.
    pub logger_exit_flag: std::sync::Arc<AtomicBool>,
    /// Join handle for the per-service logger thread, while running.
    pub logger_handle: Option<std::thread::JoinHandle<()>>,
    /// Set once a `sync` service has run to completion. Kept distinct from
    /// `pid` so `pid == 0` always means "not currently running".
    pub completed: bool,
    /// Timestamp of the most recent start attempt, used to throttle respawn.
    pub last_start_attempt: u64,
}

impl Default for ServiceRuntime {
    fn default() -> Self {
        Self {
            pid: 0,
            start_time: 0,
            stdout_fd: None,
            stderr_fd: None,
            logger_exit_flag: std::sync::Arc::new(AtomicBool::new(false)),
            logger_handle: None,
            completed: false,
            last_start_attempt: 0,
        }
    }
}

impl ServiceRuntime {
    /// Whether the service currently has a live child.
    pub fn is_running(&self) -> bool {
        self.pid > 0
    }
}

/// One entry in the Service Table: a definition plus its runtime state.
pub struct ServiceEntry {
    /// Immutable-after-load definition.
    pub def: ServiceDefinition,
    /// Mutable runtime fields.
    pub runtime: ServiceRuntime,
}

/// Fixed-capacity registry of services, keyed by name with stable indices.
#[derive(Default)]
pub struct ServiceTable {
    entries: Vec<ServiceEntry>,
}

impl ServiceTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Reserves a slot for `def`, returning its stable index, or an error if
    /// the table is at capacity.
    pub fn insert(&mut self, def: ServiceDefinition) -> Result<usize, ConfigError> {
        if self.entries.len() >= MAX_NUM_SERVICES {
            return Err(ConfigError::TooManyServices {
                name: def.name,
                max: MAX_NUM_SERVICES,
            });
        }
        let index = self.entries.len();
        self.entries.push(ServiceEntry {
            def,
            runtime: ServiceRuntime::default(),
        });
        Ok(index)
    }

    /// Finds a service's index by name.
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.def.name == name)
    }

    /// Finds a service's index by live pid.
    pub fn find_by_pid(&self, pid: i32) -> Option<usize> {
        if pid <= 0 {
            return None;
        }
        self.entries.iter().position(|e| e.runtime.pid == pid)
    }

    /// Number of services currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no services.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Immutable access to an entry by index.
    pub fn get(&self, index: usize) -> &ServiceEntry {
        &self.entries[index]
    }

    /// Mutable access to an entry by index.
    pub fn get_mut(&mut self, index: usize) -> &mut ServiceEntry {
        &mut self.entries[index]
    }

    /// Iterates all entries in table (insertion) order.
    pub fn iter(&self) -> impl Iterator<Item = &ServiceEntry> {
        self.entries.iter()
    }

    /// Iterates all entries mutably in table (insertion) order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ServiceEntry> {
        self.entries.iter_mut()
    }

    /// Clears every entry. Only valid on global teardown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_def(name: &str) -> ServiceDefinition {
        ServiceDefinition {
            name: name.to_string(),
            kind: ServiceKind::Group,
            run_path: None,
            service_dir: std::path::PathBuf::from("/tmp"),
            params: Vec::new(),
            environment: Vec::new(),
            uid: 1000,
            gid: 1000,
            sgid_list: Vec::new(),
            umask: 0o022,
            priority: 0,
            working_directory: None,
            respawn: false,
            sync: false,
            ignore_failure: false,
            shutdown_on_terminate: false,
            min_running_time: 500,
            ready_timeout: 5000,
            interval: 0,
            has_kill_hook: false,
            has_is_ready_hook: false,
            has_finish_hook: false,
        }
    }

    #[test]
    fn insert_and_find_by_name() {
        let mut table = ServiceTable::new();
        let idx = table.insert(stub_def("a")).unwrap();
        assert_eq!(table.find_by_name("a"), Some(idx));
        assert_eq!(table.find_by_name("missing"), None);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut table = ServiceTable::new();
        for i in 0..MAX_NUM_SERVICES {
            table.insert(stub_def(&format!("svc{i}"))).unwrap();
        }
        let err = table.insert(stub_def("overflow")).unwrap_err();
        assert!(matches!(err, ConfigError::TooManyServices { .. }));
    }

    #[test]
    fn find_by_pid_ignores_non_running() {
        let mut table = ServiceTable::new();
        let idx = table.insert(stub_def("a")).unwrap();
        assert_eq!(table.find_by_pid(0), None);
        table.get_mut(idx).runtime.pid = 4242;
        assert_eq!(table.find_by_pid(4242), Some(idx));
    }
}
