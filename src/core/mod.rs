//! Core session components.
//!
//! This module contains the PTY-backed shell session:
//!
//! - **pty**: Unix pseudo-terminal and shell process lifecycle
//! - **term**: ANSI escape sequence processing into styled text runs
//! - **session**: Controller joining the two and serving the host
//!
//! # Architecture
//!
//! ```text
//! SessionController
//! ├── PtySession (master fd + shell process)
//! ├── EscapeProcessor (SGR / CSI / OSC classification)
//! ├── StyleState (carried across reads)
//! └── SessionHost (readiness watch + render callbacks)
//! ```

pub mod pty;
pub mod session;
pub mod term;
