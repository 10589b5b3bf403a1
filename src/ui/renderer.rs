//! Terminal renderer using crossterm
//!
//! Draws processed shell output onto the host terminal: control events first,
//! then each styled segment.

use std::io::{self, Write};

use crossterm::{
    cursor::MoveTo,
    queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{Clear, ClearType, SetTitle},
};

use crate::core::term::{Color, ControlEvent, ProcessedChunk, TextSegment};

/// Segment renderer
pub struct Renderer<W: Write> {
    out: W,
    /// Used for text without an SGR foreground
    default_fg: Option<Color>,
    /// Used for text without an SGR background
    default_bg: Option<Color>,
}

impl Renderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            default_fg: None,
            default_bg: None,
        }
    }

    pub fn with_defaults(mut self, fg: Option<Color>, bg: Option<Color>) -> Self {
        self.default_fg = fg;
        self.default_bg = bg;
        self
    }

    /// Render one chunk and flush
    pub fn render(&mut self, chunk: &ProcessedChunk) -> io::Result<()> {
        for event in &chunk.events {
            match event {
                ControlEvent::ClearScreen => queue!(self.out, Clear(ClearType::All), MoveTo(0, 0))?,
                ControlEvent::SetTitle(title) => queue!(self.out, SetTitle(title))?,
                ControlEvent::Unrecognized(_) => {}
            }
        }

        for segment in &chunk.segments {
            self.render_segment(segment)?;
        }

        self.out.flush()
    }

    fn render_segment(&mut self, segment: &TextSegment) -> io::Result<()> {
        let style = &segment.style;
        let fg = style.foreground.or(self.default_fg);
        let bg = style.background.or(self.default_bg);
        let styled = fg.is_some() || bg.is_some() || style.bold;

        if let Some(fg) = fg {
            queue!(self.out, SetForegroundColor(fg.to_crossterm()))?;
        }
        if let Some(bg) = bg {
            queue!(self.out, SetBackgroundColor(bg.to_crossterm()))?;
        }
        if style.bold {
            queue!(self.out, SetAttribute(Attribute::Bold))?;
        }

        queue!(self.out, Print(&segment.text))?;

        if styled {
            queue!(self.out, SetAttribute(Attribute::Reset), ResetColor)?;
        }
        Ok(())
    }

    /// Restore default attributes on the host terminal
    pub fn reset(&mut self) -> io::Result<()> {
        queue!(self.out, SetAttribute(Attribute::Reset), ResetColor)?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
