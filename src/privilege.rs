//! Credential-drop helpers applied in the child between `fork` and `execve`.
//! Order is fixed and load-bearing: niceness, umask, supplementary
//! groups, gid, uid, working directory. Supplementary groups and gid must be
//! set before uid — after `setuid` drops privilege, `setgroups`/`setgid`
//! would fail.

use std::path::Path;

use nix::unistd::{Gid, Uid};

/// Applies the full credential sequence for one service, in order. Intended
/// to run only in the forked child, before `execve`. Returns a short
/// diagnostic string on the first failure.
pub fn apply_credentials(
    priority: i32,
    umask: u32,
    sgid_list: &[u32],
    gid: u32,
    uid: u32,
    workdir: Option<&Path>,
) -> Result<(), String> {
    set_priority(priority)?;
    set_umask(umask);
    set_supplementary_groups(sgid_list)?;
    set_gid(gid)?;
    set_uid(uid)?;
    if let Some(dir) = workdir {
        set_workdir(dir)?;
    }
    Ok(())
}

fn set_priority(priority: i32) -> Result<(), String> {
    // SAFETY: setpriority is async-signal-safe and touches only kernel state.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, priority) };
    if rc != 0 {
        return Err(format!(
            "setpriority({priority}) failed: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}

fn set_umask(umask: u32) {
    // SAFETY: umask only touches the calling process's own state.
    unsafe {
        libc::umask(umask as libc::mode_t);
    }
}

fn set_supplementary_groups(sgid_list: &[u32]) -> Result<(), String> {
    if sgid_list.is_empty() {
        return Ok(());
    }
    let groups: Vec<libc::gid_t> = sgid_list.iter().map(|&g| g as libc::gid_t).collect();
    // SAFETY: setgroups is called before setuid, while we still hold the
    // privilege required to change the supplementary group list.
    let rc = unsafe { libc::setgroups(groups.len(), groups.as_ptr()) };
    if rc != 0 {
        return Err(format!(
            "setgroups failed: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}

fn set_gid(gid: u32) -> Result<(), String> {
    nix::unistd::setgid(Gid::from_raw(gid)).map_err(|e| format!("setgid({gid}) failed: {e}"))
}

fn set_uid(uid: u32) -> Result<(), String> {
    nix::unistd::setuid(Uid::from_raw(uid)).map_err(|e| format!("setuid({uid}) failed: {e}"))
}

fn set_workdir(dir: &Path) -> Result<(), String> {
    nix::unistd::chdir(dir).map_err(|e| format!("chdir({}) failed: {e}", dir.display()))
}
