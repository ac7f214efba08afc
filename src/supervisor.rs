//! Supervisor Loop: drives startup in start order, then reaps,
//! restarts, and re-triggers services in steady state until a shutdown is
//! requested.

use std::time::Instant;

use nix::sys::signal::kill;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::constants::{
    MIN_RUNNING_TIME_POLL_INTERVAL, SERVICE_READINESS_CHECK_INTERVAL, SERVICE_RESTART_DELAY,
    SUPERVISOR_FAILURE_EXIT, SUPERVISOR_TICK_INTERVAL,
};
use crate::launcher;
use crate::order::StartOrder;
use crate::output;
use crate::service::{ServiceKind, ServiceTable};
use crate::signals;

/// Drives one supervisor run end to end.
pub struct Supervisor {
    progname: String,
    prefix_width: usize,
    table: ServiceTable,
    order: StartOrder,
    origin: Instant,
    startup_failed: bool,
    shutdown_exit_code: Option<i32>,
}

impl Supervisor {
    /// Builds a supervisor over an already-loaded service table and order.
    pub fn new(progname: String, table: ServiceTable, order: StartOrder) -> Self {
        let prefix_width = output::prefix_width(table.iter().map(|e| e.def.name.len()));
        Self {
            progname,
            prefix_width,
            table,
            order,
            origin: Instant::now(),
            startup_failed: false,
            shutdown_exit_code: None,
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn log(&self, message: &str) {
        output::emit_supervisor_line(&self.progname, self.prefix_width, message);
        tracing::info!("{message}");
    }

    /// Runs startup, then steady state until shutdown is requested. Returns
    /// the service table and order so the caller's Shutdown Driver can use
    /// them, plus the exit code to propagate.
    pub fn run(mut self) -> (ServiceTable, StartOrder, i32) {
        self.startup();
        if !signals::shutdown_requested() {
            self.steady_state();
        }
        let code = self
            .shutdown_exit_code
            .unwrap_or(if self.startup_failed { SUPERVISOR_FAILURE_EXIT } else { 0 });
        (self.table, self.order, code)
    }

    fn start_one(&mut self, index: usize) -> bool {
        let now = self.now_ms();
        let def = self.table.get(index).def.clone();
        match launcher::start(&def, now, self.prefix_width) {
            Ok(launched) => {
                let entry = self.table.get_mut(index);
                entry.runtime.pid = launched.pid;
                entry.runtime.start_time = launched.start_time;
                entry.runtime.last_start_attempt = launched.start_time;
                entry.runtime.stdout_fd = Some(launched.stdout_fd);
                entry.runtime.stderr_fd = Some(launched.stderr_fd);
                entry.runtime.logger_exit_flag = launched.logger_exit_flag;
                entry.runtime.logger_handle = Some(launched.logger_handle);
                true
            }
            Err(e) => {
                self.log(&format!("failed to start '{}': {e}", def.name));
                false
            }
        }
    }

    fn is_alive(pid: i32) -> bool {
        kill(Pid::from_raw(pid), None).is_ok()
    }

    fn startup(&mut self) {
        let planned: Vec<usize> = self.order.iter().collect();
        for index in planned {
            if signals::shutdown_requested() {
                return;
            }
            let (kind, name, sync, ignore_failure, min_running_time, has_is_ready_hook, ready_timeout) = {
                let def = &self.table.get(index).def;
                (
                    def.kind,
                    def.name.clone(),
                    def.sync,
                    def.ignore_failure,
                    def.min_running_time,
                    def.has_is_ready_hook,
                    def.ready_timeout,
                )
            };
            if !matches!(kind, ServiceKind::Runnable) {
                continue;
            }
            if !self.start_one(index) {
                self.handle_startup_failure(index, ignore_failure);
                if signals::shutdown_requested() {
                    return;
                }
                continue;
            }

            let failure = if sync {
                self.wait_sync(index)
            } else {
                self.wait_min_running_time(index, min_running_time)
                    .or_else(|| {
                        if has_is_ready_hook {
                            self.wait_ready(index, ready_timeout)
                        } else {
                            None
                        }
                    })
            };

            if let Some(reason) = failure {
                self.log(&format!("service '{name}': {reason}"));
                self.handle_startup_failure(index, ignore_failure);
                if signals::shutdown_requested() {
                    return;
                }
            }
        }
    }

    fn handle_startup_failure(&mut self, index: usize, ignore_failure: bool) {
        if ignore_failure {
            return;
        }
        self.startup_failed = true;
        signals::request_shutdown();
        let _ = index;
    }

    /// Blocks until the sync service exits to completion, then reaps it. A
    /// non-zero effective exit code is treated as a startup failure.
    fn wait_sync(&mut self, index: usize) -> Option<String> {
        let pid = self.table.get(index).runtime.pid;
        loop {
            match waitpid(Pid::from_raw(pid), None) {
                Ok(status) => {
                    let code = launcher::effective_exit_code(status);
                    self.reap(index, status);
                    return if code != 0 {
                        Some(format!("sync service exited with status {code}"))
                    } else {
                        None
                    };
                }
                Err(nix::errno::Errno::EINTR) => {
                    // Interrupted wait; re-check and resume.
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    fn wait_min_running_time(&mut self, index: usize, min_running_time: u64) -> Option<String> {
        loop {
            if signals::shutdown_requested() {
                return None;
            }
            let (pid, start_time) = {
                let r = &self.table.get(index).runtime;
                (r.pid, r.start_time)
            };
            if self.now_ms().saturating_sub(start_time) >= min_running_time {
                return None;
            }
            if !Self::is_alive(pid) {
                if let Some(status) = self.try_reap(index) {
                    let _ = status;
                }
                return Some("minimum uptime not met".to_string());
            }
            std::thread::sleep(MIN_RUNNING_TIME_POLL_INTERVAL);
        }
    }

    fn wait_ready(&mut self, index: usize, ready_timeout: u64) -> Option<String> {
        let deadline = self.now_ms() + ready_timeout;
        let service_dir = self.table.get(index).def.service_dir.clone();
        loop {
            if signals::shutdown_requested() {
                return None;
            }
            let pid = self.table.get(index).runtime.pid;
            if !Self::is_alive(pid) {
                self.try_reap(index);
                return Some("died before becoming ready".to_string());
            }
            match crate::hooks::run_is_ready_hook(&service_dir, pid) {
                Ok(true) => return None,
                Ok(false) | Err(_) => {}
            }
            if self.now_ms() >= deadline {
                return Some(format!("not ready after {ready_timeout} msec"));
            }
            std::thread::sleep(SERVICE_READINESS_CHECK_INTERVAL);
        }
    }

    /// Reap protocol for one exit: stop the logger, close the ptys,
    /// clear `pid`, then run `finish`.
    fn reap(&mut self, index: usize, status: WaitStatus) {
        let (service_dir, shutdown_on_terminate, name) = {
            let def = &self.table.get(index).def;
            (def.service_dir.clone(), def.shutdown_on_terminate, def.name.clone())
        };

        {
            let runtime = &mut self.table.get_mut(index).runtime;
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
        self.log(&format!("service '{name}' exited with status {effective_code}"));
        if let Err(e) = crate::hooks::run_finish_hook(&service_dir, effective_code) {
            self.log(&format!("finish hook for '{name}' failed: {e}"));
        }

        if shutdown_on_terminate {
            self.shutdown_exit_code = Some(effective_code);
            signals::request_shutdown();
        }
    }

    fn try_reap(&mut self, index: usize) -> Option<WaitStatus> {
        let pid = self.table.get(index).runtime.pid;
        if pid <= 0 {
            return None;
        }
        match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => None,
            Ok(status) => {
                self.reap(index, status);
                Some(status)
            }
            Err(_) => None,
        }
    }

    fn steady_state(&mut self) {
        loop {
            if signals::shutdown_requested() {
                return;
            }

            self.reap_all_exited();

            self.schedule_respawns();
            self.schedule_intervals();

            if self.all_exited_and_unrestartable() {
                self.log("all services exited; requesting shutdown");
                signals::request_shutdown();
                return;
            }

            if signals::shutdown_requested() {
                return;
            }
            std::thread::sleep(SUPERVISOR_TICK_INTERVAL);
        }
    }

    fn reap_all_exited(&mut self) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(nix::errno::Errno::ECHILD) => break,
                Ok(status) => {
                    let pid = status_pid(&status);
                    match self.table.find_by_pid(pid) {
                        Some(index) => self.reap(index, status),
                        None => self.log(&format!("reaped unknown child pid {pid}")),
                    }
                }
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
    }

    fn schedule_respawns(&mut self) {
        let now = self.now_ms();
        let candidates: Vec<usize> = self
            .table
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.def.respawn
                    && !e.runtime.is_running()
                    && now.saturating_sub(e.runtime.last_start_attempt) >= SERVICE_RESTART_DELAY.as_millis() as u64
            })
            .map(|(i, _)| i)
            .collect();
        for index in candidates {
            self.start_one(index);
        }
    }

    fn schedule_intervals(&mut self) {
        let now = self.now_ms();
        let indices: Vec<usize> = (0..self.table.len()).collect();
        for index in indices {
            let (interval, running, start_time, name) = {
                let e = self.table.get(index);
                (
                    e.def.interval,
                    e.runtime.is_running(),
                    e.runtime.start_time,
                    e.def.name.clone(),
                )
            };
            if interval == 0 {
                continue;
            }
            let interval_ms = interval * 1000;
            if now.saturating_sub(start_time) < interval_ms {
                continue;
            }
            if running {
                self.log(&format!("service '{name}': interval overrun, still running"));
                self.table.get_mut(index).runtime.start_time = now;
            } else {
                self.start_one(index);
            }
        }
    }

    fn all_exited_and_unrestartable(&self) -> bool {
        self.table.iter().all(|e| {
            !matches!(e.def.kind, ServiceKind::Runnable)
                || (!e.runtime.is_running() && !e.def.respawn && e.def.interval == 0)
        })
    }
}

fn status_pid(status: &WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(pid, _) => pid.as_raw(),
        WaitStatus::Signaled(pid, _, _) => pid.as_raw(),
        WaitStatus::Stopped(pid, _) => pid.as_raw(),
        WaitStatus::Continued(pid) => pid.as_raw(),
        WaitStatus::PtraceEvent(pid, _, _) => pid.as_raw(),
        WaitStatus::PtraceSyscall(pid) => pid.as_raw(),
        WaitStatus::StillAlive => -1,
    }
}
