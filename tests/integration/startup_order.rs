#[path = "support.rs"]
mod support;

use std::io::Read;
use std::time::Duration;

/// End-to-end scenario 1: a sync dependency must finish, and its output must
/// appear, before its dependent starts.
#[test]
fn sync_dependency_runs_before_dependent() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();

    let a = support::new_service(root, "a");
    support::write_exec(&a, "run", "echo hello\nexit 0");
    support::write_plain(&a, "sync", "true");

    let b = support::new_service(root, "b");
    support::write_exec(&b, "run", "sleep 0.2\necho started\nexit 0");
    support::write_dep(&b, "a");
    support::write_plain(&b, "shutdown_on_terminate", "true");

    let mut child = support::cinit_command(root).spawn().expect("spawn cinit");
    let status = wait_with_timeout(&mut child, Duration::from_secs(5));

    let mut stdout = String::new();
    child
        .stdout
        .take()
        .unwrap()
        .read_to_string(&mut stdout)
        .unwrap();

    assert!(status.success(), "cinit should exit cleanly: {stdout}");
    let hello_pos = stdout.find("hello").expect("hello line missing");
    let started_pos = stdout.find("started").expect("started line missing");
    assert!(hello_pos < started_pos, "a's output must precede b's: {stdout}");
}

fn wait_with_timeout(child: &mut std::process::Child, timeout: Duration) -> std::process::ExitStatus {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().expect("try_wait") {
            return status;
        }
        if std::time::Instant::now() >= deadline {
            let _ = child.kill();
            panic!("cinit did not exit within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
