//! Constants and configuration values for the cinit supervisor.
//!
//! This module centralizes all magic numbers, strings, and configuration values
//! used throughout the daemon to improve maintainability and clarity.

use std::time::Duration;

// ============================================================================
// Identity and filesystem constants
// ============================================================================

/// Program name used for the supervisor's own log prefix when not overridden
/// with `-p`/`--progname`.
pub const DEFAULT_PROGRAM_NAME: &str = "cinit";

/// Default services root directory, scanned for one subdirectory per service.
pub const SERVICES_DEFAULT_ROOT: &str = "/etc/services.d";

/// Name of the optional executable run at final process exit, if present in
/// the services root.
pub const EXIT_HOOK_NAME: &str = "exit";

// ============================================================================
// Service table limits
// ============================================================================

/// Maximum number of services the table can hold.
pub const MAX_NUM_SERVICES: usize = 64;

/// Maximum number of argv entries (`params`) per service.
pub const MAX_NUM_SERVICE_RUN_PARAMS: usize = 32;

/// Maximum number of `KEY=VALUE` entries (`environment`) per service.
pub const MAX_NUM_SERVICE_ENV_VARS: usize = 32;

/// Maximum number of supplementary group ids (`sgid`) per service.
pub const SERVICE_SGID_LIST_SIZE: usize = 32;

/// Maximum byte length of a service name.
pub const MAX_SERVICE_NAME_LEN: usize = 255;

// ============================================================================
// Logging
// ============================================================================

/// Minimum width of the `[<prefix>]` log column; widened to the longest
/// service/program name actually in use.
pub const MIN_LOG_PREFIX_LENGTH: usize = 12;

/// Per-fd line buffer used by the Output Multiplexer. A line longer than
/// this is flushed and split across two emitted lines.
pub const OUTPUT_LINE_BUFFER_SIZE: usize = 4096;

// ============================================================================
// Defaults applied to services that don't override them
// ============================================================================

/// Default uid applied to a service that doesn't specify one.
pub const SERVICE_DEFAULT_UID: u32 = 1000;

/// Default gid applied to a service that doesn't specify one.
pub const SERVICE_DEFAULT_GID: u32 = 1000;

/// Default umask applied to a service that doesn't specify one.
pub const SERVICE_DEFAULT_UMASK: u32 = 0o022;

/// Default minimum running time (ms) before a non-sync service is considered
/// to have started successfully.
pub const SERVICE_DEFAULT_MIN_RUNNING_TIME: u64 = 500;

/// Default readiness timeout (ms) for services with an `is_ready` hook.
pub const SERVICE_DEFAULT_READY_TIMEOUT: u64 = 5000;

// ============================================================================
// Timing
// ============================================================================

/// Interval between `is_ready` polls during the startup readiness wait.
pub const SERVICE_READINESS_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Minimum delay enforced between a respawn-policy restart and the previous
/// start of the same service.
pub const SERVICE_RESTART_DELAY: Duration = Duration::from_millis(500);

/// Backoff between fork retries in the Child Launcher.
pub const FORK_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Maximum number of fork attempts before a launch is declared a fatal failure.
pub const FORK_MAX_RETRIES: u32 = 4;

/// Per-service wait budget during the polite-stop phase of shutdown.
pub const POLITE_STOP_WAIT: Duration = Duration::from_millis(250);

/// Default gracetime between the broadcast TERM and broadcast KILL shutdown
/// phases, overridable with `-g`/`--services-gracetime`.
pub const SERVICES_DEFAULT_GRACETIME: Duration = Duration::from_millis(5000);

/// Steady-state supervisor loop cadence.
pub const SUPERVISOR_TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// Poll cadence while waiting for `min_running_time` to elapse.
pub const MIN_RUNNING_TIME_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll cadence used while reaping children during shutdown broadcasts.
pub const SHUTDOWN_REAP_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Exit-code conventions
// ============================================================================

/// Exit status used when the Child Launcher fails before `execve` for a
/// reason unrelated to credential setup.
pub const CHILD_PREEXEC_FAILURE_EXIT: i32 = 126;

/// Exit status used when credential setup (uid/gid/sgid/umask/priority) fails
/// in the child, between fork and `execve`.
pub const CHILD_CREDENTIAL_FAILURE_EXIT: i32 = 50;

/// Exit status reported by the supervisor on a detected failure that isn't
/// inherited from a `shutdown_on_terminate` service.
pub const SUPERVISOR_FAILURE_EXIT: i32 = 1;
