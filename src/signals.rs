//! Signal Surface: an async-signal-safe shutdown flag set from INT/TERM
//! handlers, and a no-op CHLD handler installed only to interrupt blocking
//! syscalls so the supervisor can re-check that flag promptly.

use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown_signal(_signum: c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    // Async-signal-safe advisory line: a single write(2) to a static buffer.
    const MSG: &[u8] = b"cinit: shutdown requested\n";
    unsafe {
        libc::write(libc::STDERR_FILENO, MSG.as_ptr() as *const libc::c_void, MSG.len());
    }
}

extern "C" fn handle_child_signal(_signum: c_int) {}

/// Installs INT/TERM handlers (set the shutdown flag) and a no-op CHLD
/// handler (interrupts blocking waits without auto-restart).
pub fn install() -> nix::Result<()> {
    let wake_action = SigAction::new(
        SigHandler::Handler(handle_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler touches only the atomic flag and performs a single
    // async-signal-safe write(2); no allocation, no locks.
    unsafe {
        sigaction(Signal::SIGINT, &wake_action)?;
        sigaction(Signal::SIGTERM, &wake_action)?;
    }

    let chld_action = SigAction::new(
        SigHandler::Handler(handle_child_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: no-op handler; installed without SA_RESTART so blocking waits
    // return EINTR instead of being transparently retried by the kernel.
    unsafe {
        sigaction(Signal::SIGCHLD, &chld_action)?;
    }
    Ok(())
}

/// Whether a shutdown has been requested, by signal or by the supervisor.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Requests a shutdown from within the supervisor itself (fatal error,
/// `shutdown_on_terminate` service exit, or all-services-exited condition).
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Maps a signal number to its POSIX mnemonic for log messages. The source
/// this supervisor is modeled on confuses `SIGQUIT`/`SIGTRAP`; this mapping
/// is verified against `signal.h` instead.
pub fn signal_to_str(signum: i32) -> &'static str {
    match Signal::try_from(signum) {
        Ok(Signal::SIGHUP) => "SIGHUP",
        Ok(Signal::SIGINT) => "SIGINT",
        Ok(Signal::SIGQUIT) => "SIGQUIT",
        Ok(Signal::SIGILL) => "SIGILL",
        Ok(Signal::SIGTRAP) => "SIGTRAP",
        Ok(Signal::SIGABRT) => "SIGABRT",
        Ok(Signal::SIGBUS) => "SIGBUS",
        Ok(Signal::SIGFPE) => "SIGFPE",
        Ok(Signal::SIGKILL) => "SIGKILL",
        Ok(Signal::SIGUSR1) => "SIGUSR1",
        Ok(Signal::SIGSEGV) => "SIGSEGV",
        Ok(Signal::SIGUSR2) => "SIGUSR2",
        Ok(Signal::SIGPIPE) => "SIGPIPE",
        Ok(Signal::SIGALRM) => "SIGALRM",
        Ok(Signal::SIGTERM) => "SIGTERM",
        Ok(Signal::SIGCHLD) => "SIGCHLD",
        Ok(Signal::SIGCONT) => "SIGCONT",
        Ok(Signal::SIGSTOP) => "SIGSTOP",
        _ => "UNKNOWN",
    }
}
