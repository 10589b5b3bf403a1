//! ptyterm - a shell running on a pseudo-terminal, rendered as styled text
//!
//! The library allocates a PTY, runs a shell on its slave side and turns the
//! shell's output into runs of styled text. It does not own an event loop:
//! the embedding application watches the master descriptor and drives a
//! [`SessionController`] through the [`SessionHost`] contract.
//!
//! ```text
//! host readiness ──▶ SessionController::on_readable ──▶ PtySession::read
//!                                     │
//!                                     ▼
//!                          EscapeProcessor::process
//!                                     │
//!                                     ▼
//!                        SessionHost::on_output(chunk)
//! ```

#[cfg(not(unix))]
compile_error!("ptyterm requires a Unix pseudo-terminal");

pub mod config;
pub mod core;
pub mod ui;

#[cfg(test)]
mod test_utils;

pub use crate::config::Config;
pub use crate::core::pty::{PtyError, PtySession, ReadOutcome, SessionState};
pub use crate::core::session::{
    ControllerState, SessionController, SessionError, SessionHost, SessionOptions,
};
pub use crate::core::term::{
    Color, ControlEvent, EscapeProcessor, ProcessedChunk, StyleState, TextSegment,
};
