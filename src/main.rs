//! ptyterm - a line-oriented shell host
//!
//! Runs the user's shell on a pseudo-terminal and relays lines typed on
//! standard input to it. Shell output is stripped of terminal control
//! sequences and redrawn with its colors and boldness.
//!
//! # Quick Start
//!
//! ```text
//! ptyterm                 # $SHELL, or /bin/bash
//! ptyterm -s /bin/zsh     # a specific shell
//! ```
//!
//! Ctrl+C interrupts the shell's foreground job; Ctrl+D on an empty line
//! ends the session.

use std::io::{self, BufRead};
use std::os::fd::{AsFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Context;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ptyterm::ui::Renderer;
use ptyterm::{Config, ProcessedChunk, SessionController, SessionError, SessionHost};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Set by the SIGINT handler, consumed by the main loop
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Command line arguments
#[derive(Debug, Default)]
struct Args {
    shell: Option<String>,
}

fn print_help() {
    eprintln!("ptyterm {} - a shell on a pseudo-terminal", VERSION);
    eprintln!();
    eprintln!("Usage: ptyterm [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --shell <PATH>    Shell to run (default: config, $SHELL, /bin/bash)");
    eprintln!("  -V, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Configuration: ~/.ptyterm/config.toml");
    eprintln!("Logging:       ~/.ptyterm/ptyterm.log (filter with PTYTERM_LOG)");
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("ptyterm {}", VERSION);
                std::process::exit(0);
            }
            "-s" | "--shell" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing shell argument".to_string());
                }
                parsed.shell = Some(args[i].clone());
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

fn init_logging(config: &Config) {
    let log_path = Config::log_path();
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env("PTYTERM_LOG")
            .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

extern "C" fn on_sigint(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Route Ctrl+C to the shell instead of terminating the host
fn install_interrupt_handler() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler only stores to an atomic
    unsafe { sigaction(Signal::SIGINT, &action) }.map(drop)
}

/// Host side of the session: draws output on stdout
struct TerminalHost {
    renderer: Renderer<io::Stdout>,
    watching: bool,
}

impl SessionHost for TerminalHost {
    fn watch_readable(&mut self, fd: RawFd) {
        debug!("Watching PTY master fd {}", fd);
        self.watching = true;
    }

    fn unwatch_readable(&mut self, fd: RawFd) {
        debug!("No longer watching fd {}", fd);
        self.watching = false;
    }

    fn on_output(&mut self, chunk: &ProcessedChunk) {
        if let Err(e) = self.renderer.render(chunk) {
            warn!("Failed to render output: {}", e);
        }
    }

    fn on_error(&mut self, error: &SessionError) {
        warn!("{}", error);
        eprintln!("ptyterm: {}", error);
    }

    fn on_exit(&mut self, status: Option<i32>) {
        match status {
            Some(code) => info!("Shell exited with status {}", code),
            None => info!("Shell closed the terminal"),
        }
    }
}

fn is_ready(fd: &PollFd) -> bool {
    fd.revents().map_or(false, |r| {
        r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}

/// Complete lines from `pending`, without their terminators
fn take_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = pending.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line);
        lines.push(text.trim_end_matches(['\n', '\r']).to_string());
    }
    lines
}

fn run(args: Args, config: Config) -> anyhow::Result<()> {
    install_interrupt_handler().context("Failed to install SIGINT handler")?;

    let options = config.session_options(args.shell.as_deref());
    if let Some(shell) = &options.shell {
        info!("Shell: {}", shell.display());
    }

    let host = TerminalHost {
        renderer: Renderer::stdout()
            .with_defaults(config.default_foreground, config.default_background),
        watching: false,
    };
    let mut controller = SessionController::new(options, host);
    controller.start(None).context("Failed to start shell")?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut pending = Vec::new();

    loop {
        if INTERRUPTED.swap(false, Ordering::SeqCst) {
            debug!("Forwarding interrupt");
            controller.interrupt();
        }
        if controller.is_eof() {
            break;
        }

        let (master_ready, stdin_ready) = {
            let stdin_fd = io::stdin();
            let mut fds = vec![PollFd::new(stdin_fd.as_fd(), PollFlags::POLLIN)];
            if controller.host().watching {
                if let Some(master) = controller.pty().master() {
                    fds.push(PollFd::new(master, PollFlags::POLLIN));
                }
            }

            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e).context("poll failed"),
            }
            (fds.get(1).map_or(false, is_ready), is_ready(&fds[0]))
        };

        if master_ready {
            controller.on_readable();
        }

        if stdin_ready {
            let buf = input.fill_buf().context("Failed to read stdin")?;
            if buf.is_empty() {
                info!("End of input");
                break;
            }
            pending.extend_from_slice(buf);
            let consumed = buf.len();
            input.consume(consumed);

            for line in take_lines(&mut pending) {
                // Failures were already reported through the host
                let _ = controller.submit(&line);
            }
        }
    }

    controller.shutdown();
    let _ = controller.host_mut().renderer.reset();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let config = Config::load();
    init_logging(&config);
    info!("ptyterm {} starting...", VERSION);

    run(args, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_lines() {
        let mut pending = b"ls -la\r\necho hi\npartial".to_vec();
        assert_eq!(take_lines(&mut pending), vec!["ls -la", "echo hi"]);
        assert_eq!(pending, b"partial");

        pending.extend_from_slice(b" line\n");
        assert_eq!(take_lines(&mut pending), vec!["partial line"]);
        assert!(pending.is_empty());
    }
}
