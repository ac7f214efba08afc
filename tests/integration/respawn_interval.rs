#[path = "support.rs"]
mod support;

use std::io::Read;
use std::time::Duration;

/// End-to-end scenarios 2 and 6: a respawning service restarts at least 3
/// times within 2s with >=500ms between starts, while an interval service
/// that overruns its period is not started a second time while still
/// running.
#[test]
fn respawn_throttles_and_interval_does_not_overlap() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();

    let x = support::new_service(root, "x");
    support::write_exec(&x, "run", "date +%s%3N\nsleep 0.1\nexit 1");
    support::write_plain(&x, "respawn", "true");

    let p = support::new_service(root, "p");
    support::write_exec(&p, "run", "echo launch-marker\nsleep 3\nexit 0");
    support::write_plain(&p, "interval", "1");

    let mut child = support::cinit_command(root).spawn().expect("spawn cinit");
    std::thread::sleep(Duration::from_millis(2300));

    let pid = nix::unistd::Pid::from_raw(child.id() as i32);
    let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
    let status = wait_with_timeout(&mut child, Duration::from_secs(3));
    assert!(status.code().is_some() || !status.success());

    let mut stdout = String::new();
    child
        .stdout
        .take()
        .unwrap()
        .read_to_string(&mut stdout)
        .unwrap();

    let x_timestamps: Vec<u64> = stdout
        .lines()
        .filter(|l| l.starts_with("[x") || l.trim_start().starts_with("x"))
        .filter_map(|l| l.rsplit(' ').next())
        .filter_map(|tok| tok.trim().parse::<u64>().ok())
        .collect();
    assert!(
        x_timestamps.len() >= 3,
        "expected >=3 respawns of x within 2s, got {}: {stdout}",
        x_timestamps.len()
    );
    for pair in x_timestamps.windows(2) {
        assert!(
            pair[1].saturating_sub(pair[0]) >= 450,
            "respawn delay should be >=500ms (allowing scheduling slack): {pair:?}"
        );
    }

    let p_launches = stdout.matches("launch-marker").count();
    assert_eq!(p_launches, 1, "interval service must not overlap itself: {stdout}");
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
