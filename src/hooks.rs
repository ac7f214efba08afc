//! Hook invocation helpers: `kill`, `is_ready`, `finish`, and the root-level
//! `exit` hook. None of these are fatal on failure except `is_ready` timing
//! out (handled by the caller, not here).

use std::ffi::CString;
use std::path::Path;

use crate::error::SupervisorError;

/// Runs the service's `kill` hook, if present, passing the child's pid as
/// argv[1]. Blocks until the hook exits; failures are reported, not fatal.
pub fn run_kill_hook(service_dir: &Path, pid: i32) -> Result<(), SupervisorError> {
    run_hook(&service_dir.join("kill"), "kill", &[pid.to_string()])
}

/// Runs the service's `is_ready` hook, passing the child's pid as argv[1].
/// Returns whether it exited 0 ("ready").
pub fn run_is_ready_hook(service_dir: &Path, pid: i32) -> Result<bool, SupervisorError> {
    let path = service_dir.join("is_ready");
    let status = std::process::Command::new(&path)
        .arg(pid.to_string())
        .current_dir(service_dir)
        .status()
        .map_err(|source| SupervisorError::HookExecution {
            service: service_dir.display().to_string(),
            hook: "is_ready",
            source,
        })?;
    Ok(status.success())
}

/// Runs the service's `finish` hook, if present, passing the effective exit
/// code string as argv[1].
pub fn run_finish_hook(service_dir: &Path, effective_exit_code: i32) -> Result<(), SupervisorError> {
    run_hook(
        &service_dir.join("finish"),
        "finish",
        &[effective_exit_code.to_string()],
    )
}

fn run_hook(path: &Path, hook: &'static str, args: &[String]) -> Result<(), SupervisorError> {
    if !path.is_file() {
        return Ok(());
    }
    let cwd = path.parent().unwrap_or(Path::new("/"));
    std::process::Command::new(path)
        .args(args)
        .current_dir(cwd)
        .status()
        .map_err(|source| SupervisorError::HookExecution {
            service: path.display().to_string(),
            hook,
            source,
        })?;
    Ok(())
}

/// Executes the root-level `exit` hook in place of the current process, if
/// present; never returns on success. If absent, the caller exits directly.
pub fn exec_exit_hook(root: &Path, status: i32) -> Result<(), SupervisorError> {
    let path = root.join(crate::constants::EXIT_HOOK_NAME);
    if !path.is_file() {
        return Ok(());
    }
    let c_path = CString::new(path.as_os_str().to_string_lossy().as_bytes())
        .map_err(|e| SupervisorError::CredentialSetup {
            service: "exit".to_string(),
            reason: e.to_string(),
        })?;
    let argv0 = CString::new("exit").expect("static string has no NUL");
    let status_arg = CString::new(status.to_string()).expect("integer string has no NUL");
    let argv = [argv0, status_arg];
    // Replaces this process image; only returns on failure.
    nix::unistd::execv(&c_path, &argv).map_err(SupervisorError::Errno)?;
    unreachable!("execv only returns on error, which is mapped above");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::OpenOptionsExt;

    fn write_exec(path: &Path, script: &str) {
        use std::io::Write;
        let mut opts = std::fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true).mode(0o755);
        let mut f = opts.open(path).unwrap();
        write!(f, "{script}").unwrap();
    }

    #[test]
    fn missing_hook_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(run_kill_hook(tmp.path(), 1234).is_ok());
        assert!(run_finish_hook(tmp.path(), 0).is_ok());
    }

    #[test]
    fn is_ready_reports_exit_status() {
        let tmp = tempfile::tempdir().unwrap();
        write_exec(&tmp.path().join("is_ready"), "#!/bin/sh\nexit 0\n");
        assert!(run_is_ready_hook(tmp.path(), 1).unwrap());

        write_exec(&tmp.path().join("is_ready"), "#!/bin/sh\nexit 1\n");
        assert!(!run_is_ready_hook(tmp.path(), 1).unwrap());
    }
}
