//! Pseudo-terminal allocation for the Child Launcher. Two ptys are
//! opened per service, one for stdout and one for stderr, so that stream
//! identity survives and the child never sees a block-buffered pipe.

use std::os::fd::{AsRawFd, OwnedFd};

use nix::pty::{openpty, OpenptyResult};

/// A single pty pair: the supervisor keeps `master`, the child gets `slave`.
pub struct PtyPair {
    /// Kept open by the supervisor; read from by the Output Multiplexer.
    pub master: OwnedFd,
    /// Duplicated onto the child's stdout or stderr before `execve`.
    pub slave: OwnedFd,
}

impl PtyPair {
    /// Opens a fresh pty pair with default termios/winsize.
    pub fn open() -> nix::Result<Self> {
        let OpenptyResult { master, slave } = openpty(None, None)?;
        Ok(Self { master, slave })
    }
}

/// Both pty pairs backing one running service.
pub struct ServicePtys {
    /// Carries the child's stdout.
    pub stdout: PtyPair,
    /// Carries the child's stderr.
    pub stderr: PtyPair,
}

impl ServicePtys {
    /// Allocates both pairs for a service launch.
    pub fn open() -> nix::Result<Self> {
        Ok(Self {
            stdout: PtyPair::open()?,
            stderr: PtyPair::open()?,
        })
    }

    /// Raw fds of both master ends, for the Output Multiplexer's poll set.
    pub fn master_fds(&self) -> (i32, i32) {
        (self.stdout.master.as_raw_fd(), self.stderr.master.as_raw_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_two_distinct_pairs() {
        let ptys = ServicePtys::open().expect("pty allocation should succeed under test");
        let (out_fd, err_fd) = ptys.master_fds();
        assert_ne!(out_fd, err_fd);
    }
}
