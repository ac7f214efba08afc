#[path = "support.rs"]
mod support;

use std::time::{Duration, Instant};

/// End-to-end scenario 4: a service marked `shutdown_on_terminate` ending on
/// its own drives the whole supervisor down, and its exit code becomes the
/// process exit code.
#[test]
fn shutdown_on_terminate_propagates_exit_code() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();

    let w = support::new_service(root, "w");
    support::write_exec(&w, "run", "sleep 10");
    support::write_plain(&w, "respawn", "true");

    let z = support::new_service(root, "z");
    support::write_exec(&z, "run", "sleep 0.2\nexit 42");
    support::write_plain(&z, "shutdown_on_terminate", "true");

    let mut child = support::cinit_command(root).spawn().expect("spawn cinit");
    let status = wait_with_timeout(&mut child, Duration::from_secs(5));

    assert_eq!(status.code(), Some(42));
}

/// End-to-end scenario 5: a service that ignores SIGTERM survives the polite
/// and gracetime phases and is only reaped once SIGKILL is broadcast, so the
/// whole shutdown takes at least as long as the configured gracetime.
#[test]
fn stubborn_service_is_force_killed_after_gracetime() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();

    let stubborn = support::new_service(root, "stubborn");
    support::write_exec(
        &stubborn,
        "run",
        "trap '' TERM\nwhile true; do sleep 1; done",
    );

    let mut child = support::cinit_command(root).spawn().expect("spawn cinit");
    // Let the service reach steady state before triggering shutdown.
    std::thread::sleep(Duration::from_millis(300));

    let pid = nix::unistd::Pid::from_raw(child.id() as i32);
    let start = Instant::now();
    let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);

    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    let elapsed = start.elapsed();

    assert!(!status.success());
    assert!(
        elapsed >= Duration::from_millis(400),
        "a SIGTERM-ignoring service must not be reaped before gracetime elapses: {elapsed:?}"
    );
    assert!(
        elapsed <= Duration::from_secs(3),
        "shutdown should complete well within a few seconds of the KILL broadcast: {elapsed:?}"
    );
}

fn wait_with_timeout(child: &mut std::process::Child, timeout: Duration) -> std::process::ExitStatus {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().expect("try_wait") {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("cinit did not exit within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
