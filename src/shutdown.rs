//! Shutdown Driver: polite reverse-order stop, broadcast TERM with a
//! gracetime deadline, broadcast KILL, then the optional `exit` hook.

use std::path::Path;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::constants::{POLITE_STOP_WAIT, SHUTDOWN_REAP_POLL_INTERVAL};
use crate::hooks;
use crate::launcher;
use crate::order::StartOrder;
use crate::output;
use crate::service::ServiceTable;

/// Runs all four shutdown phases and returns the process exit status.
pub fn run(
    root: &Path,
    progname: &str,
    prefix_width: usize,
    table: &mut ServiceTable,
    order: &StartOrder,
    gracetime: Duration,
    exit_code: i32,
) -> i32 {
    let log = |msg: &str| output::emit_supervisor_line(progname, prefix_width, msg);

    log("shutdown requested: stopping services");
    polite_stop(table, order, &log);

    if any_running(table) {
        log("broadcasting SIGTERM");
        let _ = kill(Pid::from_raw(-1), Signal::SIGTERM);
        reap_until_empty_or_deadline(table, Instant::now() + gracetime, &log);
    }

    if any_running(table) {
        log("broadcasting SIGKILL");
        let _ = kill(Pid::from_raw(-1), Signal::SIGKILL);
        reap_until_empty_or_deadline(table, Instant::now() + Duration::from_secs(3600), &log);
    }

    if let Err(e) = hooks::exec_exit_hook(root, exit_code) {
        log(&format!("exit hook failed: {e}"));
    }
    exit_code
}

fn any_running(table: &ServiceTable) -> bool {
    table.iter().any(|e| e.runtime.is_running())
}

fn polite_stop(table: &mut ServiceTable, order: &StartOrder, log: &impl Fn(&str)) {
    let indices: Vec<usize> = order.iter_rev().collect();
    for index in indices {
        let (pid, service_dir, has_kill_hook) = {
            let e = table.get(index);
            (e.runtime.pid, e.def.service_dir.clone(), e.def.has_kill_hook)
        };
        if pid <= 0 {
            continue;
        }
        if has_kill_hook {
            if let Err(e) = hooks::run_kill_hook(&service_dir, pid) {
                log(&format!("kill hook failed: {e}"));
            }
        }
        let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);

        let deadline = Instant::now() + POLITE_STOP_WAIT;
        while Instant::now() < deadline {
            match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
                Ok(nix::sys::wait::WaitStatus::StillAlive) => {
                    std::thread::sleep(SHUTDOWN_REAP_POLL_INTERVAL);
                }
                Ok(status) => {
                    clear_runtime(table, index, status, log);
                    break;
                }
                Err(_) => break,
            }
        }
    }
}

fn reap_until_empty_or_deadline(table: &mut ServiceTable, deadline: Instant, log: &impl Fn(&str)) {
    loop {
        if !any_running(table) {
            return;
        }
        if Instant::now() >= deadline {
            log("gracetime elapsed with services still alive");
            return;
        }
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(nix::sys::wait::WaitStatus::StillAlive) => {
                std::thread::sleep(SHUTDOWN_REAP_POLL_INTERVAL);
            }
            Ok(status) => {
                let pid = match status {
                    WaitStatus::Exited(pid, _) => pid.as_raw(),
                    WaitStatus::Signaled(pid, _, _) => pid.as_raw(),
                    _ => continue,
                };
                if let Some(index) = table.find_by_pid(pid) {
                    clear_runtime(table, index, status, log);
                }
            }
            Err(nix::errno::Errno::ECHILD) => return,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => return,
        }
    }
}

/// Mirrors `Supervisor::reap`'s protocol so a service reaped during shutdown
/// still gets its `finish` hook run with the effective exit code.
fn clear_runtime(table: &mut ServiceTable, index: usize, status: WaitStatus, log: &impl Fn(&str)) {
    let (service_dir, name) = {
        let def = &table.get(index).def;
        (def.service_dir.clone(), def.name.clone())
    };

    {
        let runtime = &mut table.get_mut(index).runtime;
        runtime
            .logger_exit_flag
            .store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(handle) = runtime.logger_handle.take() {
            let _ = handle.join();
        }
        runtime.stdout_fd.take();
        runtime.stderr_fd.take();
        runtime.pid = 0;
        runtime.completed = true;
    }

    let effective_code = launcher::effective_exit_code(status);
    if let Err(e) = hooks::run_finish_hook(&service_dir, effective_code) {
        log(&format!("finish hook for '{name}' failed: {e}"));
    }
}
