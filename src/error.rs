//! Error handling for cinit.
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort service-directory loading before any service is started.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while scanning the services root or a service directory.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path being read when the failure occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A runnable service has no `run` file.
    #[error("service '{name}' has no 'run' executable")]
    MissingRun {
        /// Service name.
        name: String,
    },

    /// A service's `run` file exists but lacks the executable bit.
    #[error("service '{name}': 'run' at {path} is not executable")]
    RunNotExecutable {
        /// Service name.
        name: String,
        /// Path to the non-executable file.
        path: PathBuf,
    },

    /// A service name exceeds the maximum allowed length.
    #[error("service name '{name}' exceeds {max} bytes")]
    NameTooLong {
        /// The offending name.
        name: String,
        /// Maximum allowed length.
        max: usize,
    },

    /// The services root contains more service directories than the table
    /// can hold.
    #[error("maximum number of services ({max}) reached at '{name}'")]
    TooManyServices {
        /// Name of the service that would have exceeded capacity.
        name: String,
        /// Table capacity.
        max: usize,
    },

    /// A `params`/`environment`/`sgid` list exceeds its configured maximum.
    #[error("service '{name}': too many entries in '{field}' (max {max})")]
    TooManyEntries {
        /// Service name.
        name: String,
        /// Field name (`params`, `environment`, or `sgid`).
        field: &'static str,
        /// Maximum allowed entries.
        max: usize,
    },

    /// `respawn`/`sync`/`interval` were configured in a mutually exclusive
    /// combination.
    #[error("service '{name}': {reason}")]
    MutuallyExclusiveFlags {
        /// Service name.
        name: String,
        /// Human-readable explanation of the conflicting flags.
        reason: String,
    },

    /// A scalar value file failed to parse as its expected type.
    #[error("service '{name}': invalid value for '{field}' at {path}: {reason}")]
    InvalidValue {
        /// Service name.
        name: String,
        /// Field name (e.g. `uid`, `umask`, `interval`).
        field: &'static str,
        /// Path of the offending value file.
        path: PathBuf,
        /// Human-readable reason the value was rejected.
        reason: String,
    },

    /// A `uid`/`gid` value file named a user or group that does not exist.
    #[error("service '{name}': unknown {field} name '{value}'")]
    UnknownIdentity {
        /// Service name.
        name: String,
        /// `uid` or `gid`.
        field: &'static str,
        /// The name that failed to resolve.
        value: String,
    },

    /// An environment entry's key failed the `[A-Za-z_][A-Za-z0-9_]*` check.
    #[error("service '{name}': invalid environment variable name '{key}'")]
    InvalidEnvName {
        /// Service name.
        name: String,
        /// The offending key.
        key: String,
    },

    /// The services root itself does not exist or is not a directory.
    #[error("services root {path} does not exist or is not a directory")]
    InvalidRoot {
        /// Offending path.
        path: PathBuf,
    },

    /// The services root was given as a relative path.
    #[error("services root {path} must be an absolute path")]
    RootNotAbsolute {
        /// Offending path.
        path: PathBuf,
    },
}

/// Errors raised while the supervisor is running: launching, hook invocation,
/// and reaping. None of these abort the process outright except through an
/// explicit shutdown request.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Fork was retried the maximum number of times and still failed.
    #[error("failed to fork for service '{service}' after {attempts} attempts: {source}")]
    ForkExhausted {
        /// Service that failed to start.
        service: String,
        /// Number of attempts made.
        attempts: u32,
        /// Underlying errno.
        #[source]
        source: nix::errno::Errno,
    },

    /// Pty pair allocation failed.
    #[error("failed to allocate pty for service '{service}': {source}")]
    PtyAllocation {
        /// Service that failed to start.
        service: String,
        /// Underlying errno.
        #[source]
        source: nix::errno::Errno,
    },

    /// Credential setup (uid/gid/sgid/umask/priority) failed in the child
    /// between fork and exec.
    #[error("credential setup failed for service '{service}': {reason}")]
    CredentialSetup {
        /// Service that failed to start.
        service: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A hook (`kill`, `is_ready`, `finish`, `exit`) failed to execute. Never
    /// fatal on its own.
    #[error("hook '{hook}' for service '{service}' failed: {source}")]
    HookExecution {
        /// Service the hook belongs to.
        service: String,
        /// Hook name (`kill`, `is_ready`, `finish`, `exit`).
        hook: &'static str,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A service did not meet `min_running_time` before exiting.
    #[error("service '{service}': minimum uptime not met")]
    MinimumUptimeNotMet {
        /// Service that failed startup.
        service: String,
    },

    /// A service's `is_ready` hook never exited 0 before `ready_timeout`.
    #[error("service '{service}': not ready after {timeout_ms} msec")]
    ReadyTimeout {
        /// Service that failed startup.
        service: String,
        /// Configured timeout, in milliseconds.
        timeout_ms: u64,
    },

    /// A raw errno from a syscall not covered by a more specific variant.
    #[error(transparent)]
    Errno(#[from] nix::errno::Errno),

    /// A raw I/O error not covered by a more specific variant.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
