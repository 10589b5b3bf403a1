//! ANSI style-run extraction
//!
//! - **style**: `StyleState`, the color palette and the processor's output types
//! - **parser**: `EscapeProcessor`, the escape sequence state machine

pub mod parser;
pub mod style;

pub use parser::{EscapeProcessor, CLEAR_SCREEN};
pub use style::{Color, ControlEvent, ProcessedChunk, StyleState, TextSegment};
