//! Session management
//!
//! Connects a `PtySession` to the escape processor and to the host that
//! displays the result. Everything runs on the host's event-loop thread: the
//! host watches the master descriptor and calls `on_readable` when it is
//! ready, and forwards user input through `submit` and `interrupt`.

use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use nix::sys::signal::Signal;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::pty::{PtyError, PtySession, ReadOutcome};
use super::term::{EscapeProcessor, ProcessedChunk, StyleState};

/// Bytes read from the master per readiness notification
pub const DEFAULT_CHUNK_SIZE: usize = 256;
/// Upper bound on the read buffer
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error("Session has not been started")]
    NotStarted,

    #[error("Session is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Callbacks the embedding application provides
pub trait SessionHost {
    /// Start delivering `on_readable` whenever `fd` is readable
    fn watch_readable(&mut self, fd: RawFd);

    /// Stop watching `fd`
    fn unwatch_readable(&mut self, fd: RawFd);

    /// Styled output of one read. Apply `chunk.events` before appending
    /// `chunk.segments`.
    fn on_output(&mut self, chunk: &ProcessedChunk);

    /// A non-fatal read or write failure
    fn on_error(&mut self, error: &SessionError) {
        warn!("Session error: {}", error);
    }

    /// The shell closed its side of the terminal
    fn on_exit(&mut self, _status: Option<i32>) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Closed,
}

/// How to start the shell
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub shell: Option<PathBuf>,
    /// Environment overrides for the shell
    pub env: Vec<(String, String)>,
    pub chunk_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            shell: None,
            env: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// A shell session bound to a host
pub struct SessionController<H: SessionHost> {
    pty: PtySession,
    processor: EscapeProcessor,
    /// Style carried from one chunk to the next
    style: StyleState,
    host: H,
    options: SessionOptions,
    state: ControllerState,
    watched: Option<RawFd>,
    eof: bool,
    title: Option<String>,
    buffer: Vec<u8>,
}

impl<H: SessionHost> SessionController<H> {
    pub fn new(options: SessionOptions, host: H) -> Self {
        let buffer = vec![0u8; options.chunk_size.clamp(1, MAX_CHUNK_SIZE)];
        Self {
            pty: PtySession::new(),
            processor: EscapeProcessor::new(),
            style: StyleState::default(),
            host,
            options,
            state: ControllerState::Idle,
            watched: None,
            eof: false,
            title: None,
            buffer,
        }
    }

    /// Spawn the shell and register the master with the host.
    ///
    /// `shell` overrides the shell from the options.
    pub fn start(&mut self, shell: Option<&Path>) -> Result<()> {
        match self.state {
            ControllerState::Idle => {}
            ControllerState::Running => return Err(PtyError::AlreadyStarted.into()),
            ControllerState::Closed => return Err(SessionError::Closed),
        }

        let shell = shell.or(self.options.shell.as_deref());
        if let Err(e) = self.pty.spawn(shell, &self.options.env) {
            error!("Failed to start shell: {}", e);
            return Err(e.into());
        }

        if let Some(fd) = self.pty.master_fd() {
            self.host.watch_readable(fd);
            self.watched = Some(fd);
        }
        self.state = ControllerState::Running;
        info!("Session started");
        Ok(())
    }

    /// Read one chunk from the master and hand the result to the host
    pub fn on_readable(&mut self) {
        if self.state != ControllerState::Running || self.eof {
            debug!("Ignoring readiness in state {:?}", self.state);
            return;
        }

        match self.pty.read(&mut self.buffer) {
            ReadOutcome::Data(n) => {
                let text = String::from_utf8_lossy(&self.buffer[..n]);
                let chunk = self.processor.process(&text, &mut self.style);

                if let Some(title) = chunk.title() {
                    self.title = Some(title.to_string());
                }
                if !chunk.is_empty() {
                    self.host.on_output(&chunk);
                }
            }
            ReadOutcome::EndOfFile => {
                info!("Shell closed the terminal");
                self.eof = true;
                self.unwatch();
                let status = self.pty.try_wait();
                self.host.on_exit(status);
            }
            ReadOutcome::Error(e) => {
                warn!("{}", e);
                self.host.on_error(&SessionError::Pty(e));
            }
        }
    }

    /// Send a line of input to the shell, newline appended
    pub fn submit(&mut self, line: &str) -> Result<usize> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.send_raw(&data)
    }

    /// Send bytes to the shell unchanged
    pub fn send_raw(&mut self, data: &[u8]) -> Result<usize> {
        match self.state {
            ControllerState::Running => {}
            ControllerState::Idle => return Err(SessionError::NotStarted),
            ControllerState::Closed => return Err(SessionError::Closed),
        }

        self.pty.write(data).map_err(|e| {
            warn!("{}", e);
            let e = SessionError::Pty(e);
            self.host.on_error(&e);
            e
        })
    }

    /// Deliver SIGINT to the shell's foreground job
    pub fn interrupt(&mut self) {
        if self.state != ControllerState::Running {
            debug!("Interrupt ignored: no running shell");
            return;
        }
        self.pty.signal_child_group(Signal::SIGINT);
    }

    /// Stop watching the master, close it and kill the shell
    pub fn shutdown(&mut self) {
        if self.state == ControllerState::Closed {
            return;
        }
        self.unwatch();
        self.pty.terminate();
        self.state = ControllerState::Closed;
        info!("Session closed");
    }

    fn unwatch(&mut self) {
        if let Some(fd) = self.watched.take() {
            self.host.unwatch_readable(fd);
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// The shell has closed the terminal; only `shutdown` remains useful
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Style in effect for the next chunk
    pub fn style(&self) -> StyleState {
        self.style
    }

    /// Most recent title set by the shell
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn pty(&self) -> &PtySession {
        &self.pty
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}

impl<H: SessionHost> Drop for SessionController<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
