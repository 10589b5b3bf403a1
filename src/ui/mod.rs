//! Host-side rendering.
//!
//! - **renderer**: draws `ProcessedChunk`s onto a crossterm terminal

pub mod renderer;

pub use renderer::Renderer;
