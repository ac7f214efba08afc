#[path = "support.rs"]
mod support;

use std::io::Read;
use std::time::Duration;

/// End-to-end scenario 3: a service whose `is_ready` hook never succeeds
/// fails startup after its `ready_timeout`, and since `ignore_failure` is
/// unset the whole supervisor shuts down with a non-zero exit status.
#[test]
fn unready_service_times_out_and_aborts_startup() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();

    let y = support::new_service(root, "y");
    support::write_exec(&y, "run", "sleep 5\nexit 0");
    support::write_exec(&y, "is_ready", "exit 1");
    support::write_plain(&y, "ready_timeout", "1000");

    let mut child = support::cinit_command(root).spawn().expect("spawn cinit");
    let status = wait_with_timeout(&mut child, Duration::from_secs(5));

    let mut stdout = String::new();
    child
        .stdout
        .take()
        .unwrap()
        .read_to_string(&mut stdout)
        .unwrap();

    assert!(!status.success(), "startup failure must yield a non-zero exit: {stdout}");
    assert!(
        stdout.contains("not ready after 1000 msec"),
        "expected readiness timeout message: {stdout}"
    );
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
