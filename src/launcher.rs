//! Child Launcher: forks, wires up ptys, drops credentials, and
//! execs one service's `run` program.
//!
//! Built on raw `fork`/`execve` rather than `std::process::Command`: the
//! spec's distinct pre-exec exit codes (126 vs. 50) and its requirement that
//! argv[0] be the executable's basename rather than its full path aren't
//! expressible through `Command`'s pre-exec hook.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use nix::errno::Errno;
use nix::unistd::{fork, ForkResult, Pid};

use crate::constants::{
    CHILD_CREDENTIAL_FAILURE_EXIT, CHILD_PREEXEC_FAILURE_EXIT, FORK_MAX_RETRIES, FORK_RETRY_BACKOFF,
};
use crate::error::SupervisorError;
use crate::output;
use crate::privilege;
use crate::pty::ServicePtys;
use crate::service::ServiceDefinition;

/// Everything the supervisor needs to track about a freshly launched child.
pub struct Launched {
    /// The child's pid.
    pub pid: i32,
    /// Monotonic-ish launch timestamp, in milliseconds.
    pub start_time: u64,
    /// Master fd of the stdout pty; owned by the caller thereafter.
    pub stdout_fd: OwnedFd,
    /// Master fd of the stderr pty; owned by the caller thereafter.
    pub stderr_fd: OwnedFd,
    /// Shared flag used to ask the logger thread to stop.
    pub logger_exit_flag: Arc<AtomicBool>,
    /// Join handle for the spawned logger thread.
    pub logger_handle: std::thread::JoinHandle<()>,
}

fn to_cstring(s: &str) -> Result<CString, SupervisorError> {
    CString::new(s).map_err(|e| SupervisorError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))
}

fn build_argv(run_path: &std::path::Path, params: &[String]) -> Result<Vec<CString>, SupervisorError> {
    let argv0 = run_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("run");
    let mut argv = Vec::with_capacity(params.len() + 1);
    argv.push(to_cstring(argv0)?);
    for p in params {
        argv.push(to_cstring(p)?);
    }
    Ok(argv)
}

fn build_envp(environment: &[(String, String)]) -> Result<Option<Vec<CString>>, SupervisorError> {
    if environment.is_empty() {
        return Ok(None);
    }
    let mut envp = Vec::with_capacity(environment.len());
    for (key, value) in environment {
        envp.push(to_cstring(&format!("{key}={value}"))?);
    }
    Ok(Some(envp))
}

/// Starts one runnable service: opens two ptys, forks (retrying on
/// transient failure), drops credentials in the child, execs `run`, and
/// spawns the Output Multiplexer in the parent.
pub fn start(def: &ServiceDefinition, now_ms: u64, prefix_width: usize) -> Result<Launched, SupervisorError> {
    let run_path = def
        .run_path
        .clone()
        .expect("start() is only called for runnable services");

    let ptys = ServicePtys::open().map_err(|source| SupervisorError::PtyAllocation {
        service: def.name.clone(),
        source,
    })?;

    let path_c = to_cstring(&run_path.to_string_lossy())?;
    let argv = build_argv(&run_path, &def.params)?;
    let envp = build_envp(&def.environment)?;

    let mut attempt = 0u32;
    let pid = loop {
        attempt += 1;
        // SAFETY: the child path below calls only async-signal-safe
        // equivalents (dup2, setpgid, nix credential wrappers, execve) and
        // terminates via _exit/exit without returning to this function.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                child_main(&ptys, &path_c, &argv, envp.as_deref(), def);
            }
            Ok(ForkResult::Parent { child }) => break child,
            Err(Errno::EAGAIN) if attempt < FORK_MAX_RETRIES => {
                std::thread::sleep(FORK_RETRY_BACKOFF);
            }
            Err(source) => {
                return Err(SupervisorError::ForkExhausted {
                    service: def.name.clone(),
                    attempts: attempt,
                    source,
                });
            }
        }
    };

    // Parent: the slaves now live only in the child's fd table.
    drop(ptys.stdout.slave);
    drop(ptys.stderr.slave);

    let logger_exit_flag = Arc::new(AtomicBool::new(false));
    let stdout_fd = ptys.stdout.master;
    let stderr_fd = ptys.stderr.master;
    let logger_handle = output::spawn(
        def.name.clone(),
        stdout_fd.as_raw_fd(),
        stderr_fd.as_raw_fd(),
        Arc::clone(&logger_exit_flag),
        prefix_width,
    );

    Ok(Launched {
        pid: pid.as_raw(),
        start_time: now_ms,
        stdout_fd,
        stderr_fd,
        logger_exit_flag,
        logger_handle,
    })
}

/// Runs entirely in the forked child. Never returns.
fn child_main(
    ptys: &ServicePtys,
    path: &CString,
    argv: &[CString],
    envp: Option<&[CString]>,
    def: &ServiceDefinition,
) -> ! {
    let out_fd = ptys.stdout.slave.as_raw_fd();
    let err_fd = ptys.stderr.slave.as_raw_fd();

    if nix::unistd::dup2(out_fd, 1).is_err() || nix::unistd::dup2(err_fd, 2).is_err() {
        exit_child(CHILD_PREEXEC_FAILURE_EXIT, "failed to attach pty to stdio");
    }
    // The originals (and the master ends, inherited across fork) must be
    // closed so the logger sees EOF when this child eventually exits.
    let _ = nix::unistd::close(ptys.stdout.master.as_raw_fd());
    let _ = nix::unistd::close(ptys.stderr.master.as_raw_fd());
    if out_fd > 2 {
        let _ = nix::unistd::close(out_fd);
    }
    if err_fd > 2 {
        let _ = nix::unistd::close(err_fd);
    }

    if nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0)).is_err() {
        exit_child(CHILD_PREEXEC_FAILURE_EXIT, "setpgid failed");
    }

    if nix::unistd::chdir(&def.service_dir).is_err() {
        exit_child(CHILD_PREEXEC_FAILURE_EXIT, "chdir to service directory failed");
    }

    if let Err(reason) = privilege::apply_credentials(
        def.priority,
        def.umask,
        &def.sgid_list,
        def.gid,
        def.uid,
        def.working_directory.as_deref(),
    ) {
        exit_child(CHILD_CREDENTIAL_FAILURE_EXIT, &reason);
    }

    let exec_result = match envp {
        Some(envp) => nix::unistd::execve(path, argv, envp),
        None => nix::unistd::execv(path, argv),
    };
    // execve/execv only return on failure.
    let _ = exec_result;
    exit_child(CHILD_PREEXEC_FAILURE_EXIT, "execve failed");
}

fn exit_child(code: i32, message: &str) -> ! {
    use std::io::Write;
    let _ = writeln!(std::io::stderr(), "cinit: {message}");
    std::process::exit(code);
}

/// Maps a reaped child's wait status to the effective exit code passed to
/// `finish`: the real exit code, `128 + signum` on signal death, or 126 if
/// neither is reported.
pub fn effective_exit_code(status: nix::sys::wait::WaitStatus) -> i32 {
    match status {
        nix::sys::wait::WaitStatus::Exited(_, code) => code,
        nix::sys::wait::WaitStatus::Signaled(_, signal, _) => 128 + signal as i32,
        _ => 126,
    }
}
