//! Text style state and the processor's output types
//!
//! A `StyleState` is the attribute set carried from one chunk of shell output
//! to the next. The processor snapshots it into every `TextSegment` it emits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The eight-color ANSI palette addressed by SGR 30-37 / 40-47
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl Color {
    pub const ALL: [Color; 8] = [
        Color::Black,
        Color::Red,
        Color::Green,
        Color::Yellow,
        Color::Blue,
        Color::Magenta,
        Color::Cyan,
        Color::White,
    ];

    /// Palette entry for an SGR offset (`code - 30` or `code - 40`)
    pub fn from_index(index: u16) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Color::Black => "black",
            Color::Red => "red",
            Color::Green => "green",
            Color::Yellow => "yellow",
            Color::Blue => "blue",
            Color::Magenta => "magenta",
            Color::Cyan => "cyan",
            Color::White => "white",
        }
    }

    /// Convert to crossterm color
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        use crossterm::style::Color as Ct;
        match self {
            Color::Black => Ct::Black,
            Color::Red => Ct::DarkRed,
            Color::Green => Ct::DarkGreen,
            Color::Yellow => Ct::DarkYellow,
            Color::Blue => Ct::DarkBlue,
            Color::Magenta => Ct::DarkMagenta,
            Color::Cyan => Ct::DarkCyan,
            Color::White => Ct::Grey,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name() == lower)
            .ok_or_else(|| format!("Unknown color: {}", s))
    }
}

/// Attributes applied to text by SGR sequences
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StyleState {
    pub bold: bool,
    pub foreground: Option<Color>,
    pub background: Option<Color>,
}

impl StyleState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Apply a single SGR parameter. Codes outside the handled set are ignored.
    pub fn apply_sgr(&mut self, code: u16) {
        match code {
            0 => self.reset(),
            1 => self.bold = true,
            30..=37 => self.foreground = Color::from_index(code - 30),
            40..=47 => self.background = Color::from_index(code - 40),
            _ => {}
        }
    }
}

/// A run of literal text and the style it was written in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextSegment {
    pub text: String,
    pub style: StyleState,
}

impl TextSegment {
    pub fn new(text: impl Into<String>, style: StyleState) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

/// Out-of-band effects found in a chunk of output
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    /// Cursor-home followed by erase-display
    ClearScreen,
    /// OSC 0 / OSC 2 window title
    SetTitle(String),
    /// An escape sequence that was discarded without being classified
    /// (malformed, or cut off by the end of the chunk). Holds the raw text.
    Unrecognized(String),
}

/// Result of processing one chunk.
///
/// Hosts apply `events` before appending `segments`: the screen clear is
/// matched ahead of every other rule, so it precedes all text of its chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessedChunk {
    pub segments: Vec<TextSegment>,
    pub events: Vec<ControlEvent>,
}

impl ProcessedChunk {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.events.is_empty()
    }

    /// Concatenated text of all segments
    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    pub fn has_clear_screen(&self) -> bool {
        self.events.contains(&ControlEvent::ClearScreen)
    }

    /// Last title set in this chunk, if any
    pub fn title(&self) -> Option<&str> {
        self.events.iter().rev().find_map(|e| match e {
            ControlEvent::SetTitle(t) => Some(t.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_from_any_state() {
        let mut style = StyleState {
            bold: true,
            foreground: Some(Color::Red),
            background: Some(Color::Blue),
        };
        style.apply_sgr(0);
        assert!(style.is_default());

        let mut plain = StyleState::default();
        plain.apply_sgr(0);
        assert!(plain.is_default());
    }

    #[test]
    fn test_palette_codes() {
        let mut style = StyleState::default();
        style.apply_sgr(36);
        style.apply_sgr(43);
        assert_eq!(style.foreground, Some(Color::Cyan));
        assert_eq!(style.background, Some(Color::Yellow));
        assert!(!style.bold);
    }

    #[test]
    fn test_unknown_codes_ignored() {
        let mut style = StyleState::default();
        style.apply_sgr(31);
        for code in [2, 4, 38, 39, 49, 90, 107, 999] {
            style.apply_sgr(code);
        }
        assert_eq!(style.foreground, Some(Color::Red));
        assert_eq!(style.background, None);
    }

    #[test]
    fn test_color_names() {
        assert_eq!("Magenta".parse::<Color>(), Ok(Color::Magenta));
        assert!("orange".parse::<Color>().is_err());
        assert_eq!(Color::from_index(7), Some(Color::White));
        assert_eq!(Color::from_index(8), None);
    }

    #[test]
    fn test_chunk_title() {
        let chunk = ProcessedChunk {
            segments: vec![TextSegment::new("a", StyleState::default())],
            events: vec![
                ControlEvent::SetTitle("one".into()),
                ControlEvent::SetTitle("two".into()),
            ],
        };
        assert_eq!(chunk.title(), Some("two"));
        assert_eq!(chunk.text(), "a");
        assert!(!chunk.has_clear_screen());
    }
}
