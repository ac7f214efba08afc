//! Output Multiplexer: one background thread per running service,
//! turning its two pty streams into line-prefixed records on the
//! supervisor's own aggregate stdout/stderr.

use std::io::Write;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::constants::OUTPUT_LINE_BUFFER_SIZE;

static AGGREGATE_STDOUT: Mutex<()> = Mutex::new(());
static AGGREGATE_STDERR: Mutex<()> = Mutex::new(());

/// Which of the child's streams a line originated from.
#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Escape hatch: a line beginning with this literal prefix bypasses the
/// service name prefix entirely.
const RAW_PREFIX: &str = ":::";

fn emit_line(stream: Stream, service: &str, prefix_width: usize, line: &str) {
    let (lock, mut handle): (&Mutex<()>, Box<dyn Write>) = match stream {
        Stream::Stdout => (&AGGREGATE_STDOUT, Box::new(std::io::stdout())),
        Stream::Stderr => (&AGGREGATE_STDERR, Box::new(std::io::stderr())),
    };
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(rest) = line.strip_prefix(RAW_PREFIX) {
        let _ = writeln!(handle, "{rest}");
    } else {
        let _ = writeln!(handle, "[{service:<prefix_width$}] {line}");
    }
}

/// Drains complete lines out of `buf`, emitting each one. A line exceeding
/// the buffer capacity is split at the boundary: exactly
/// `OUTPUT_LINE_BUFFER_SIZE` bytes are flushed as one line, and the
/// remainder continues accumulating as the next line.
fn drain_lines(buf: &mut Vec<u8>, stream: Stream, service: &str, prefix_width: usize) {
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n' || b == b'\r') {
            let mut line: Vec<u8> = buf.drain(..=pos).collect();
            line.pop();
            emit_line(stream, service, prefix_width, &String::from_utf8_lossy(&line));
        } else if buf.len() >= OUTPUT_LINE_BUFFER_SIZE {
            let line: Vec<u8> = buf.drain(..OUTPUT_LINE_BUFFER_SIZE).collect();
            emit_line(stream, service, prefix_width, &String::from_utf8_lossy(&line));
        } else {
            break;
        }
    }
}

fn flush_remainder(buf: &mut Vec<u8>, stream: Stream, service: &str, prefix_width: usize) {
    if !buf.is_empty() {
        let line = std::mem::take(buf);
        emit_line(stream, service, prefix_width, &String::from_utf8_lossy(&line));
    }
}

struct FdState {
    fd: RawFd,
    buf: Vec<u8>,
    open: bool,
}

/// Spawns the per-service logger thread. `prefix_width` is the padded
/// column width computed once across all configured service names.
pub fn spawn(
    service: String,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
    exit_flag: Arc<AtomicBool>,
    prefix_width: usize,
) -> JoinHandle<()> {
    std::thread::spawn(move || run(service, stdout_fd, stderr_fd, exit_flag, prefix_width))
}

fn run(service: String, stdout_fd: RawFd, stderr_fd: RawFd, exit_flag: Arc<AtomicBool>, prefix_width: usize) {
    let mut out = FdState {
        fd: stdout_fd,
        buf: Vec::new(),
        open: true,
    };
    let mut err = FdState {
        fd: stderr_fd,
        buf: Vec::new(),
        open: true,
    };
    let mut read_buf = [0u8; OUTPUT_LINE_BUFFER_SIZE];

    loop {
        if !out.open && !err.open {
            break;
        }
        if exit_flag.load(Ordering::SeqCst) {
            break;
        }

        let mut fds = Vec::new();
        if out.open {
            fds.push(PollFd::new(unsafe { borrow(out.fd) }, PollFlags::POLLIN));
        }
        if err.open {
            fds.push(PollFd::new(unsafe { borrow(err.fd) }, PollFlags::POLLIN));
        }

        match poll(&mut fds, PollTimeout::from(200u16)) {
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(_) => break,
        }

        let mut idx = 0;
        if out.open {
            let revents = fds[idx].revents().unwrap_or(PollFlags::empty());
            idx += 1;
            service_read(&mut out, &mut read_buf, revents, Stream::Stdout, &service, prefix_width);
        }
        if err.open {
            let revents = fds[idx].revents().unwrap_or(PollFlags::empty());
            service_read(&mut err, &mut read_buf, revents, Stream::Stderr, &service, prefix_width);
        }
    }

    flush_remainder(&mut out.buf, Stream::Stdout, &service, prefix_width);
    flush_remainder(&mut err.buf, Stream::Stderr, &service, prefix_width);
}

fn service_read(
    state: &mut FdState,
    read_buf: &mut [u8],
    revents: PollFlags,
    stream: Stream,
    service: &str,
    prefix_width: usize,
) {
    if revents.is_empty() {
        return;
    }
    if revents.intersects(PollFlags::POLLIN) {
        match nix::unistd::read(state.fd, read_buf) {
            Ok(0) => {
                state.open = false;
            }
            Ok(n) => {
                state.buf.extend_from_slice(&read_buf[..n]);
                drain_lines(&mut state.buf, stream, service, prefix_width);
            }
            // A pty whose slave side is fully closed reports EIO on read.
            Err(Errno::EIO) => state.open = false,
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => {}
            Err(_) => state.open = false,
        }
    }
    if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
        state.open = false;
    }
}

/// `PollFd` only borrows its fd for the scope of one `poll` call, but we
/// need to rebuild the poll set every iteration against the same fd we
/// already own; this helper just documents that the borrow is sound because
/// `state.fd` outlives every `poll` call built from it.
unsafe fn borrow<'a>(fd: RawFd) -> std::os::fd::BorrowedFd<'a> {
    std::os::fd::BorrowedFd::borrow_raw(fd)
}

/// Widest configured service name, floored at the minimum column width.
pub fn prefix_width(names: impl Iterator<Item = usize>) -> usize {
    names
        .max()
        .unwrap_or(crate::constants::MIN_LOG_PREFIX_LENGTH)
        .max(crate::constants::MIN_LOG_PREFIX_LENGTH)
}

/// Writes one supervisor-originated log line through the same aggregate
/// stdout mutex the per-service loggers use, so messages never interleave
/// mid-line.
pub fn emit_supervisor_line(progname: &str, prefix_width: usize, message: &str) {
    emit_line(Stream::Stdout, progname, prefix_width, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_prefix_lines_bypass_service_name() {
        assert!(":::already formatted".starts_with(RAW_PREFIX));
    }

    #[test]
    fn drain_lines_splits_oversize_buffer() {
        let mut buf = vec![b'x'; OUTPUT_LINE_BUFFER_SIZE + 10];
        drain_lines(&mut buf, Stream::Stdout, "svc", 12);
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn prefix_width_floors_at_minimum() {
        assert_eq!(prefix_width(std::iter::empty()), crate::constants::MIN_LOG_PREFIX_LENGTH);
        assert_eq!(prefix_width([3, 20, 5].into_iter()), 20);
    }
}
