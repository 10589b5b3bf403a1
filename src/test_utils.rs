//! Test utilities for ptyterm.
//!
//! Helpers for driving a real PTY from tests without ever blocking
//! indefinitely, plus a `SessionHost` that records every callback.

#![cfg(test)]

use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::core::pty::{PtySession, ReadOutcome};
use crate::core::session::{SessionController, SessionError, SessionHost};
use crate::core::term::{ProcessedChunk, TextSegment};

/// Shell used by PTY tests
pub const SHELL: &str = "/bin/sh";

/// Upper bound for any wait on shell output
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait up to `timeout_ms` for the master to become readable (or hang up)
pub fn wait_readable(pty: &PtySession, timeout_ms: u16) -> bool {
    let Some(master) = pty.master() else {
        return false;
    };
    let mut fds = [PollFd::new(master, PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::from(timeout_ms)) {
        Ok(n) if n > 0 => fds[0].revents().map_or(false, |r| {
            r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
        }),
        _ => false,
    }
}

/// Read raw output until it contains `needle`, EOF, or the timeout
pub fn read_until(pty: &mut PtySession, needle: &str, timeout: Duration) -> String {
    let deadline = Instant::now() + timeout;
    let mut output = String::new();
    let mut buffer = [0u8; 256];

    while Instant::now() < deadline && !output.contains(needle) {
        if !wait_readable(pty, 100) {
            continue;
        }
        match pty.read(&mut buffer) {
            ReadOutcome::Data(n) => output.push_str(&String::from_utf8_lossy(&buffer[..n])),
            ReadOutcome::EndOfFile | ReadOutcome::Error(_) => break,
        }
    }
    output
}

/// Feed `on_readable` until the host has seen `needle`, EOF, or the timeout
pub fn drain_until(
    controller: &mut SessionController<RecordingHost>,
    needle: &str,
    timeout: Duration,
) -> String {
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline
        && !controller.is_eof()
        && !controller.host().text().contains(needle)
    {
        if wait_readable(controller.pty(), 100) {
            controller.on_readable();
        }
    }
    controller.host().text()
}

/// Host that records every callback it receives
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub watched: Option<RawFd>,
    pub unwatched: Vec<RawFd>,
    pub chunks: Vec<ProcessedChunk>,
    pub errors: Vec<String>,
    pub exits: Vec<Option<i32>>,
}

impl RecordingHost {
    pub fn text(&self) -> String {
        self.chunks.iter().map(ProcessedChunk::text).collect()
    }

    pub fn segments(&self) -> impl Iterator<Item = &TextSegment> {
        self.chunks.iter().flat_map(|c| c.segments.iter())
    }
}

impl SessionHost for RecordingHost {
    fn watch_readable(&mut self, fd: RawFd) {
        self.watched = Some(fd);
    }

    fn unwatch_readable(&mut self, fd: RawFd) {
        self.watched = None;
        self.unwatched.push(fd);
    }

    fn on_output(&mut self, chunk: &ProcessedChunk) {
        self.chunks.push(chunk.clone());
    }

    fn on_error(&mut self, error: &SessionError) {
        self.errors.push(error.to_string());
    }

    fn on_exit(&mut self, status: Option<i32>) {
        self.exits.push(status);
    }
}
