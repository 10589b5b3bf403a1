//! Escape sequence processor
//!
//! Splits decoded shell output into styled text runs. SGR sequences update the
//! carried `StyleState`; every other recognized sequence is stripped. This is a
//! style-run extractor, not a screen model: cursor movement and erase commands
//! are recognized only so they can be removed from the text.

use std::borrow::Cow;

use tracing::{debug, trace};

use super::style::{ControlEvent, ProcessedChunk, StyleState, TextSegment};

/// Cursor-home followed by erase-display
pub const CLEAR_SCREEN: &str = "\x1b[H\x1b[2J";

const ESC: char = '\x1b';
const BEL: char = '\x07';
const DEL: char = '\x7f';
/// 8-bit String Terminator
const ST: char = '\u{9c}';

/// Parser state machine
#[derive(Clone, Copy, Debug, Default, PartialEq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    OscString,
    EscapeInOsc, // ESC received within OSC, waiting for backslash
}

/// Turns one chunk of text into `TextSegment`s and `ControlEvent`s.
///
/// Each call to [`process`](Self::process) starts from the ground state; only
/// the caller-owned `StyleState` survives between chunks. A sequence still
/// open at the end of a chunk is dropped and reported as
/// `ControlEvent::Unrecognized`.
#[derive(Debug, Default)]
pub struct EscapeProcessor {
    state: ParserState,
    /// Parameter bytes of the current CSI, verbatim
    params: String,
    intermediates: Vec<char>,
    /// CSI carried a private marker (`?`, `>`, `=`, `<`)
    private: bool,
    /// CSI carried `:` sub-parameters
    subparams: bool,
    osc_string: String,
    /// Raw text of the sequence being parsed
    raw: String,
    /// Text of the current style run
    pending: String,
}

impl EscapeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one chunk, applying SGR codes to `style` as they are met.
    pub fn process(&mut self, text: &str, style: &mut StyleState) -> ProcessedChunk {
        self.state = ParserState::Ground;
        self.raw.clear();
        self.pending.clear();

        let mut out = ProcessedChunk::default();

        let text: Cow<'_, str> = if text.contains(CLEAR_SCREEN) {
            out.events.push(ControlEvent::ClearScreen);
            Cow::Owned(text.replace(CLEAR_SCREEN, ""))
        } else {
            Cow::Borrowed(text)
        };

        for ch in text.chars() {
            self.feed(ch, style, &mut out);
        }

        if self.state != ParserState::Ground {
            debug!("Discarding unterminated sequence at end of chunk: {:?}", self.raw);
            self.unrecognized(&mut out);
        }
        self.flush(style, &mut out);
        out
    }

    fn feed(&mut self, ch: char, style: &mut StyleState, out: &mut ProcessedChunk) {
        let in_osc = matches!(self.state, ParserState::OscString | ParserState::EscapeInOsc);

        // C0 controls anywhere outside OSC
        if ch < ' ' && !in_osc {
            match ch {
                ESC => {
                    if self.state != ParserState::Ground {
                        debug!("Sequence interrupted by ESC: {:?}", self.raw);
                        self.unrecognized(out);
                    }
                    self.enter_escape();
                }
                '\n' | '\t' => self.pending.push(ch),
                _ => {}
            }
            return;
        }

        if ch == DEL {
            return;
        }

        if self.state != ParserState::Ground {
            self.raw.push(ch);
        }

        match self.state {
            ParserState::Ground => self.pending.push(ch),
            ParserState::Escape => self.escape(ch, out),
            ParserState::EscapeIntermediate => self.escape_intermediate(ch, out),
            ParserState::CsiEntry | ParserState::CsiParam => self.csi_param(ch, style, out),
            ParserState::CsiIntermediate => self.csi_intermediate(ch, style, out),
            ParserState::OscString => self.osc_string_state(ch, out),
            ParserState::EscapeInOsc => self.escape_in_osc(ch, out),
        }
    }

    fn enter_escape(&mut self) {
        self.state = ParserState::Escape;
        self.params.clear();
        self.intermediates.clear();
        self.private = false;
        self.subparams = false;
        self.raw.clear();
        self.raw.push(ESC);
    }

    fn escape(&mut self, ch: char, out: &mut ProcessedChunk) {
        match ch {
            '[' => self.state = ParserState::CsiEntry,
            ']' => {
                self.state = ParserState::OscString;
                self.osc_string.clear();
            }
            ' '..='/' => {
                self.intermediates.push(ch);
                self.state = ParserState::EscapeIntermediate;
            }
            '0'..='~' => {
                // Single-character escapes (DECSC, DECKPAM, RI, ...)
                trace!("Stripping escape {:?}", self.raw);
                self.state = ParserState::Ground;
            }
            _ => self.reject(ch, out),
        }
    }

    fn escape_intermediate(&mut self, ch: char, out: &mut ProcessedChunk) {
        match ch {
            ' '..='/' => self.intermediates.push(ch),
            '0'..='~' => {
                // Character set selection and friends
                trace!("Stripping escape {:?}", self.raw);
                self.state = ParserState::Ground;
            }
            _ => self.reject(ch, out),
        }
    }

    fn csi_param(&mut self, ch: char, style: &mut StyleState, out: &mut ProcessedChunk) {
        match ch {
            '0'..='9' | ';' => {
                self.params.push(ch);
                self.state = ParserState::CsiParam;
            }
            ':' => {
                self.params.push(ch);
                self.subparams = true;
                self.state = ParserState::CsiParam;
            }
            '<'..='?' => {
                self.private = true;
                self.state = ParserState::CsiParam;
            }
            ' '..='/' => {
                self.intermediates.push(ch);
                self.state = ParserState::CsiIntermediate;
            }
            '@'..='~' => self.execute_csi(ch, style, out),
            _ => self.reject(ch, out),
        }
    }

    fn csi_intermediate(&mut self, ch: char, style: &mut StyleState, out: &mut ProcessedChunk) {
        match ch {
            ' '..='/' => self.intermediates.push(ch),
            '@'..='~' => self.execute_csi(ch, style, out),
            _ => self.reject(ch, out),
        }
    }

    fn osc_string_state(&mut self, ch: char, out: &mut ProcessedChunk) {
        match ch {
            BEL | ST => {
                self.execute_osc(out);
                self.state = ParserState::Ground;
            }
            // Could be ST (ESC \)
            ESC => self.state = ParserState::EscapeInOsc,
            c if c < ' ' => {}
            _ => self.osc_string.push(ch),
        }
    }

    /// Handle ESC received within OSC sequence
    fn escape_in_osc(&mut self, ch: char, out: &mut ProcessedChunk) {
        self.execute_osc(out);
        match ch {
            '\\' => self.state = ParserState::Ground,
            // A second ESC opens the next sequence
            ESC => self.enter_escape(),
            c if c < ' ' => self.state = ParserState::Ground,
            _ => {
                // Not ST: the ESC starts a new sequence
                self.enter_escape();
                self.raw.push(ch);
                self.escape(ch, out);
            }
        }
    }

    /// Abandon the current sequence. The offending character is kept as text
    /// when printable.
    fn reject(&mut self, ch: char, out: &mut ProcessedChunk) {
        self.raw.pop();
        debug!("Malformed escape sequence {:?} before {:?}", self.raw, ch);
        self.unrecognized(out);
        self.state = ParserState::Ground;
        if ch >= ' ' && ch != DEL {
            self.pending.push(ch);
        }
    }

    fn unrecognized(&mut self, out: &mut ProcessedChunk) {
        out.events
            .push(ControlEvent::Unrecognized(std::mem::take(&mut self.raw)));
    }

    fn execute_csi(&mut self, final_char: char, style: &mut StyleState, out: &mut ProcessedChunk) {
        self.state = ParserState::Ground;

        let is_sgr = final_char == 'm'
            && !self.private
            && !self.subparams
            && self.intermediates.is_empty();

        if !is_sgr {
            trace!("Stripping CSI {:?}", self.raw);
            return;
        }

        // The run so far keeps the style it was written in
        self.flush(style, out);
        self.execute_sgr(style);
    }

    fn execute_sgr(&self, style: &mut StyleState) {
        if self.params.is_empty() {
            style.reset();
            return;
        }

        for field in self.params.split(';') {
            if field.is_empty() {
                style.apply_sgr(0);
            } else if let Ok(code) = field.parse::<u16>() {
                style.apply_sgr(code);
            } else {
                debug!("Ignoring out-of-range SGR parameter {:?}", field);
            }
        }
    }

    fn execute_osc(&mut self, out: &mut ProcessedChunk) {
        // Parse OSC: "code;text"
        if let Some((code, text)) = self.osc_string.split_once(';') {
            if matches!(code, "0" | "2") {
                out.events.push(ControlEvent::SetTitle(text.to_string()));
                return;
            }
        }
        trace!("Stripping OSC {:?}", self.osc_string);
    }

    fn flush(&mut self, style: &StyleState, out: &mut ProcessedChunk) {
        if !self.pending.is_empty() {
            out.segments
                .push(TextSegment::new(std::mem::take(&mut self.pending), *style));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::Color;

    fn run(input: &str) -> (ProcessedChunk, StyleState) {
        let mut style = StyleState::default();
        let chunk = EscapeProcessor::new().process(input, &mut style);
        (chunk, style)
    }

    #[test]
    fn test_plain_text_single_segment() {
        let mut style = StyleState {
            bold: true,
            foreground: Some(Color::Green),
            background: None,
        };
        let before = style;
        let chunk = EscapeProcessor::new().process("hello world\n\tnext", &mut style);

        assert_eq!(chunk.segments.len(), 1);
        assert_eq!(chunk.segments[0].text, "hello world\n\tnext");
        assert_eq!(chunk.segments[0].style, before);
        assert!(chunk.events.is_empty());
        assert_eq!(style, before);
    }

    #[test]
    fn test_clear_screen() {
        let (chunk, _) = run("before\x1b[H\x1b[2Jafter");

        assert_eq!(chunk.events, vec![ControlEvent::ClearScreen]);
        assert_eq!(chunk.text(), "beforeafter");
        assert!(chunk.segments.iter().all(|s| !s.text.contains('\x1b')));
    }

    #[test]
    fn test_clear_screen_once_per_chunk() {
        let (chunk, _) = run("\x1b[H\x1b[2J$ ls\n\x1b[H\x1b[2J$ ");

        let clears = chunk
            .events
            .iter()
            .filter(|e| **e == ControlEvent::ClearScreen)
            .count();
        assert_eq!(clears, 1);
        assert_eq!(chunk.text(), "$ ls\n$ ");
    }

    #[test]
    fn test_sgr_applied_left_to_right() {
        let (chunk, style) = run("\x1b[31;1mX");

        assert_eq!(chunk.segments.len(), 1);
        assert_eq!(chunk.segments[0].text, "X");
        assert_eq!(chunk.segments[0].style.foreground, Some(Color::Red));
        assert!(chunk.segments[0].style.bold);
        assert_eq!(style, chunk.segments[0].style);
    }

    #[test]
    fn test_segments_split_at_sgr() {
        let (chunk, style) = run("a\x1b[32mb\x1b[0mc");

        let texts: Vec<_> = chunk.segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, ["a", "b", "c"]);
        assert!(chunk.segments[0].style.is_default());
        assert_eq!(chunk.segments[1].style.foreground, Some(Color::Green));
        assert!(chunk.segments[2].style.is_default());
        assert!(style.is_default());
    }

    #[test]
    fn test_empty_sgr_resets() {
        let mut style = StyleState {
            bold: true,
            foreground: Some(Color::Blue),
            background: Some(Color::White),
        };
        let chunk = EscapeProcessor::new().process("\x1b[mx", &mut style);
        assert!(style.is_default());
        assert!(chunk.segments[0].style.is_default());

        style.bold = true;
        EscapeProcessor::new().process("\x1b[1;m", &mut style);
        assert!(style.is_default());
    }

    #[test]
    fn test_background_and_unknown_codes() {
        let (chunk, style) = run("\x1b[44;4;38;5;196mz");

        assert_eq!(chunk.text(), "z");
        assert_eq!(style.background, Some(Color::Blue));
        // 5 is unhandled; 196 too
        assert_eq!(style.foreground, None);
        assert!(!style.bold);
    }

    #[test]
    fn test_style_carried_across_chunks() {
        let mut processor = EscapeProcessor::new();
        let mut style = StyleState::default();

        let first = processor.process("\x1b[1;35mpart", &mut style);
        let second = processor.process(" two\x1b[0m!", &mut style);

        assert!(first.segments[0].style.bold);
        assert_eq!(second.segments[0].text, " two");
        assert!(second.segments[0].style.bold);
        assert_eq!(second.segments[0].style.foreground, Some(Color::Magenta));
        assert!(second.segments[1].style.is_default());
    }

    #[test]
    fn test_unknown_csi_stripped() {
        let (chunk, style) = run("\x1b[99zHELLO");

        assert_eq!(chunk.segments.len(), 1);
        assert_eq!(chunk.segments[0].text, "HELLO");
        assert!(chunk.segments[0].style.is_default());
        assert!(style.is_default());
    }

    #[test]
    fn test_inert_sequences_do_not_split_runs() {
        let (chunk, _) = run("HE\x1b[KL\x1b[?2004hL\x1b[?2004lO\x1b(B\x1b[3J\x1b7");

        assert_eq!(chunk.segments.len(), 1);
        assert_eq!(chunk.text(), "HELLO");
        assert!(chunk.events.is_empty());
    }

    #[test]
    fn test_private_m_is_not_sgr() {
        let (_, style) = run("\x1b[>4;1m\x1b[38:5:1m");
        assert!(style.is_default());
    }

    #[test]
    fn test_title_bel_and_st() {
        let (chunk, _) = run("\x1b]0;user@host: ~\x07$ \x1b]2;second\x1b\\");

        assert_eq!(
            chunk.events,
            vec![
                ControlEvent::SetTitle("user@host: ~".to_string()),
                ControlEvent::SetTitle("second".to_string()),
            ]
        );
        assert_eq!(chunk.text(), "$ ");
    }

    #[test]
    fn test_other_osc_stripped() {
        let (chunk, _) = run("a\x1b]7;file://host/tmp\x07b");
        assert_eq!(chunk.text(), "ab");
        assert!(chunk.events.is_empty());
    }

    #[test]
    fn test_osc_followed_by_new_escape() {
        let (chunk, style) = run("\x1b]0;t\x1b[1mX");
        assert_eq!(chunk.title(), Some("t"));
        assert!(style.bold);
        assert_eq!(chunk.text(), "X");
    }

    #[test]
    fn test_escape_in_osc_before_another_escape() {
        let (chunk, style) = run("\x1b]0;t\x1b\x1b[1mX");
        assert_eq!(chunk.title(), Some("t"));
        assert!(style.bold);
        assert_eq!(chunk.text(), "X");
        assert!(chunk.segments[0].style.bold);
    }

    #[test]
    fn test_escape_in_osc_before_control_character() {
        let (chunk, _) = run("\x1b]0;t\x1b\x07Y");
        assert_eq!(chunk.title(), Some("t"));
        assert_eq!(chunk.text(), "Y");
    }

    #[test]
    fn test_malformed_input_never_leaks_controls() {
        let cases = [
            "\x1b\x1bA",
            "a\x1b\x1b\x1b[31mb",
            "\x1b]0;t\x1b\x1b[1mX",
            "\x1b]0;t\x1b\x07Y",
            "\x1b]2;t\x1b\x08\x1b\x00Z",
            "\x1b[1\x07mQ",
            "\x1b[1\x1b\x07R",
            "\x1b(\x1b\x7fS",
            "\x1b[?\x1b]\x1b\x1b\x1b",
            "\x1b]0;unterminated\x1b",
        ];

        for input in cases {
            let (chunk, _) = run(input);
            for segment in &chunk.segments {
                assert!(
                    segment
                        .text
                        .chars()
                        .all(|c| (c >= ' ' && c != DEL) || c == '\n' || c == '\t'),
                    "control character in {:?} from {:?}",
                    segment.text,
                    input
                );
            }
        }
    }

    #[test]
    fn test_control_characters_dropped() {
        let (chunk, _) = run("a\x07b\x08c\rd\x7fe\x00f\n");
        assert_eq!(chunk.text(), "abcdef\n");
    }

    #[test]
    fn test_truncated_sequence_reported() {
        let (chunk, style) = run("text\x1b[3");

        assert_eq!(chunk.text(), "text");
        assert_eq!(chunk.events, vec![ControlEvent::Unrecognized("\x1b[3".to_string())]);
        assert!(style.is_default());

        let (chunk, _) = run("tail\x1b");
        assert_eq!(chunk.text(), "tail");
        assert_eq!(chunk.events, vec![ControlEvent::Unrecognized("\x1b".to_string())]);
    }

    #[test]
    fn test_malformed_sequence_keeps_following_text() {
        let (chunk, _) = run("\x1b[1é!");
        assert_eq!(chunk.text(), "é!");
        assert_eq!(chunk.events, vec![ControlEvent::Unrecognized("\x1b[1".to_string())]);
    }

    #[test]
    fn test_round_trip_plain_ascii() {
        let input = "\x1b[1mls\x1b[0m -la \x1b[Kfoo\x1b]0;t\x07 bar\x1b[36mbaz";
        let (chunk, _) = run(input);
        assert_eq!(chunk.text(), "ls -la foo barbaz");
    }

    #[test]
    fn test_non_ascii_text_preserved() {
        let (chunk, _) = run("\x1b[32m✓ héllo 日本\x1b[0m");
        assert_eq!(chunk.text(), "✓ héllo 日本");
    }

    #[test]
    fn test_empty_input() {
        let (chunk, style) = run("");
        assert!(chunk.is_empty());
        assert!(style.is_default());
    }
}
