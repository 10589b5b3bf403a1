//! Unix pseudo-terminal wrapper
//!
//! This module owns the master side of a PTY pair and the shell process
//! running on its slave side. The child is created with `fork`, becomes a
//! session leader with the slave as its controlling terminal, and then execs
//! the shell.

use std::collections::BTreeMap;
use std::ffi::{CString, OsString};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::raw::c_char;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::ptr;

use nix::errno::Errno;
use nix::pty::openpty;
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{dup2, fork, setsid, ForkResult, Pid};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Shell used when none is supplied
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// `TERM` value advertised to the shell unless overridden
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Exit status of a child that could not become the shell
pub const CHILD_SETUP_FAILED: i32 = 127;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to allocate pseudo terminal: {0}")]
    PtyAllocationFailed(#[source] Errno),

    #[error("Failed to fork shell process: {0}")]
    ForkFailed(#[source] Errno),

    #[error("Invalid shell path: {0}")]
    InvalidShellPath(String),

    #[error("Failed to read from PTY: {0}")]
    ReadError(#[source] io::Error),

    #[error("Failed to write to PTY: {0}")]
    WriteError(#[source] io::Error),

    #[error("Session has already been started")]
    AlreadyStarted,

    #[error("No shell is running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, PtyError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Running,
    Terminated,
}

/// Result of a single read from the master
#[derive(Debug)]
pub enum ReadOutcome {
    Data(usize),
    /// The slave side is closed: the shell has exited
    EndOfFile,
    Error(PtyError),
}

/// PTY master plus the shell process attached to the slave
pub struct PtySession {
    master: Option<File>,
    child: Option<Pid>,
    exit_status: Option<i32>,
    state: SessionState,
}

impl Default for PtySession {
    fn default() -> Self {
        Self::new()
    }
}

impl PtySession {
    pub fn new() -> Self {
        Self {
            master: None,
            child: None,
            exit_status: None,
            state: SessionState::Unstarted,
        }
    }

    /// Allocate a PTY and start `shell` on its slave side.
    ///
    /// `env` is applied on top of the inherited environment, after `TERM`
    /// has been set to [`DEFAULT_TERM`].
    pub fn spawn(&mut self, shell: Option<&Path>, env: &[(String, String)]) -> Result<()> {
        if self.state != SessionState::Unstarted {
            return Err(PtyError::AlreadyStarted);
        }

        let shell = resolve_shell(shell.unwrap_or_else(|| Path::new(DEFAULT_SHELL)))?;
        let plan = ExecPlan::new(&shell, env)?;

        let pty = openpty(None, None).map_err(PtyError::PtyAllocationFailed)?;
        set_cloexec(pty.master.as_raw_fd());

        // SAFETY: the child branch only makes async-signal-safe calls before
        // it execs or exits (see `child_entry`).
        match unsafe { fork() } {
            Err(e) => Err(PtyError::ForkFailed(e)),
            Ok(ForkResult::Child) => child_entry(pty.master, pty.slave, &plan),
            Ok(ForkResult::Parent { child }) => {
                // The child holds its own copies of the slave
                drop(pty.slave);

                info!("Spawned {} as pid {}", shell.display(), child);
                self.master = Some(File::from(pty.master));
                self.child = Some(child);
                self.state = SessionState::Running;
                Ok(())
            }
        }
    }

    /// Read available output. Call only when the master is readable.
    pub fn read(&mut self, buffer: &mut [u8]) -> ReadOutcome {
        let Some(master) = self.master.as_mut() else {
            return ReadOutcome::Error(PtyError::NotRunning);
        };

        let mut retried = false;
        loop {
            match master.read(buffer) {
                Ok(0) => return ReadOutcome::EndOfFile,
                Ok(n) => return ReadOutcome::Data(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted && !retried => retried = true,
                // Linux reports a hung-up slave as EIO rather than a zero read
                Err(e) if e.raw_os_error() == Some(libc::EIO) => return ReadOutcome::EndOfFile,
                Err(e) => return ReadOutcome::Error(PtyError::ReadError(e)),
            }
        }
    }

    /// Write bytes to the PTY (input to shell)
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let master = self.master.as_mut().ok_or(PtyError::NotRunning)?;

        let mut retried = false;
        loop {
            match master.write(data) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted && !retried => retried = true,
                Err(e) => return Err(PtyError::WriteError(e)),
            }
        }
    }

    /// Send `signal` to the job running on the terminal.
    ///
    /// The target is the terminal's foreground process group, which is the
    /// shell's own group unless the shell has handed the terminal to a job.
    /// Delivery failures are ignored: they mean the child exited first.
    pub fn signal_child_group(&self, signal: Signal) {
        if self.state != SessionState::Running {
            debug!("Not delivering {} to a session that is not running", signal);
            return;
        }
        let Some(child) = self.child else {
            return;
        };

        let group = self.foreground_group().unwrap_or(child);
        if let Err(e) = killpg(group, signal) {
            debug!("Ignoring failure to deliver {} to group {}: {}", signal, group, e);
        }
    }

    /// Reap the child if it has exited, without blocking
    pub fn try_wait(&mut self) -> Option<i32> {
        if self.exit_status.is_some() {
            return self.exit_status;
        }
        let child = self.child?;

        match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => {
                let code = exit_code(status)?;
                self.record_exit(code);
                Some(code)
            }
            Err(e) => {
                debug!("waitpid({}) failed: {}", child, e);
                None
            }
        }
    }

    /// Close the master and kill the child. Safe to call repeatedly.
    pub fn terminate(&mut self) {
        if let Some(master) = self.master.take() {
            debug!("Closing PTY master fd {}", master.as_raw_fd());
            drop(master);
        }

        if let Some(child) = self.child.take() {
            let flags = match kill(child, Signal::SIGKILL) {
                Ok(()) => None,
                Err(e) => {
                    // Nothing to wait for if the signal could not be sent
                    debug!("Ignoring failure to kill pid {}: {}", child, e);
                    Some(WaitPidFlag::WNOHANG)
                }
            };
            match waitpid(child, flags) {
                Ok(status) => {
                    if let Some(code) = exit_code(status) {
                        self.record_exit(code);
                    }
                }
                Err(e) => debug!("Ignoring waitpid({}) failure: {}", child, e),
            }
        }

        if self.state != SessionState::Terminated {
            info!("PTY session terminated");
        }
        self.state = SessionState::Terminated;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Pid of the shell while it has not been reaped
    pub fn child_pid(&self) -> Option<Pid> {
        self.child
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub fn is_master_open(&self) -> bool {
        self.master.is_some()
    }

    pub fn master_fd(&self) -> Option<RawFd> {
        self.master.as_ref().map(|m| m.as_raw_fd())
    }

    /// Borrowed master descriptor, for readiness polling
    pub fn master(&self) -> Option<BorrowedFd<'_>> {
        self.master.as_ref().map(|m| m.as_fd())
    }

    fn foreground_group(&self) -> Option<Pid> {
        let fd = self.master_fd()?;
        // SAFETY: tcgetpgrp only queries the descriptor
        let pgrp = unsafe { libc::tcgetpgrp(fd) };
        (pgrp > 0).then(|| Pid::from_raw(pgrp))
    }

    fn record_exit(&mut self, code: i32) {
        if code == CHILD_SETUP_FAILED {
            warn!("Shell exited with {}: it may have failed to start", code);
        } else {
            info!("Shell exited with status {}", code);
        }
        self.exit_status = Some(code);
        // The pid may be reused from here on
        self.child = None;
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn exit_code(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(128 + signal as i32),
        _ => None,
    }
}

fn set_cloexec(fd: RawFd) {
    // SAFETY: plain flag update on a descriptor we own
    if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
        debug!("Failed to set FD_CLOEXEC on PTY master: {}", Errno::last());
    }
}

/// Resolve a bare shell name against `PATH`; paths with a slash are kept.
fn resolve_shell(shell: &Path) -> Result<PathBuf> {
    let bytes = shell.as_os_str().as_bytes();
    if bytes.is_empty() {
        return Err(PtyError::InvalidShellPath("empty path".to_string()));
    }
    if bytes.contains(&b'/') {
        return Ok(shell.to_path_buf());
    }

    std::env::var_os("PATH")
        .iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join(shell))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            PtyError::InvalidShellPath(format!("{} not found on PATH", shell.display()))
        })
}

/// Everything `execve` needs, built before fork so the child never allocates
struct ExecPlan {
    path: CString,
    _argv: Vec<CString>,
    _envp: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    envp_ptrs: Vec<*const c_char>,
}

impl ExecPlan {
    fn new(shell: &Path, overrides: &[(String, String)]) -> Result<Self> {
        let invalid = || PtyError::InvalidShellPath(shell.display().to_string());

        let path = CString::new(shell.as_os_str().as_bytes()).map_err(|_| invalid())?;
        let name = shell
            .file_name()
            .map(|n| n.as_bytes())
            .unwrap_or_else(|| path.as_bytes());
        let argv = vec![CString::new(name).map_err(|_| invalid())?];

        let mut vars: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
        vars.insert("TERM".into(), DEFAULT_TERM.into());
        for (key, value) in overrides {
            vars.insert(key.into(), value.into());
        }

        let envp: Vec<CString> = vars
            .into_iter()
            .filter_map(|(key, value)| {
                let mut entry = key.into_vec();
                entry.push(b'=');
                entry.extend(value.into_vec());
                match CString::new(entry) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!("Skipping environment entry with NUL byte: {}", e);
                        None
                    }
                }
            })
            .collect();

        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);

        Ok(Self {
            path,
            _argv: argv,
            _envp: envp,
            argv_ptrs,
            envp_ptrs,
        })
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

/// Child side of the fork: turn this process into the shell, or die.
fn child_entry(master: OwnedFd, slave: OwnedFd, plan: &ExecPlan) -> ! {
    drop(master);

    if setsid().is_err() {
        child_abort(b"ptyterm: setsid failed\n");
    }

    // SAFETY: ioctl on a descriptor owned by this process
    if unsafe { libc::ioctl(slave.as_raw_fd(), libc::TIOCSCTTY as _, 0) } == -1 {
        child_abort(b"ptyterm: failed to acquire controlling terminal\n");
    }

    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if dup2(slave.as_raw_fd(), target).is_err() {
            child_abort(b"ptyterm: dup2 failed\n");
        }
    }

    if slave.as_raw_fd() > libc::STDERR_FILENO {
        drop(slave);
    } else {
        // Already one of the standard streams
        std::mem::forget(slave);
    }

    // SAFETY: both arrays are null-terminated and outlive the call
    unsafe {
        libc::execve(
            plan.path.as_ptr(),
            plan.argv_ptrs.as_ptr(),
            plan.envp_ptrs.as_ptr(),
        );
    }
    child_abort(b"ptyterm: exec of shell failed\n")
}

fn child_abort(message: &[u8]) -> ! {
    // SAFETY: write(2) and _exit(2) are async-signal-safe
    unsafe {
        libc::write(libc::STDERR_FILENO, message.as_ptr().cast(), message.len());
        libc::_exit(CHILD_SETUP_FAILED)
    }
}
