//! VT100 escape-sequence parser.
//!
//! The parser is a byte-driven state machine that turns output bytes into
//! [`Action`]s. It owns no screen state: the terminal applies each action in
//! one `match`. Sequences longer than [`MAX_ESCAPE_LEN`] bytes and sequences
//! with unknown final bytes are dropped with a debug log.

use smallvec::SmallVec;

use crate::utf8::Utf8Decoder;

/// Longest escape sequence accepted before it is abandoned.
pub const MAX_ESCAPE_LEN: usize = 32;

/// OSC strings are consumed and ignored, up to this many bytes.
pub const MAX_OSC_LEN: usize = 1024;

/// Numeric CSI parameters. Missing parameters are zero.
pub type Params = SmallVec<[u64; 4]>;

/// A parsed terminal operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Print(char),
    Backspace,
    Tab,
    LineFeed,
    CarriageReturn,
    /// ESC D
    Index,
    /// ESC E
    NextLine,
    /// ESC M
    ReverseIndex,
    /// ESC 7 or CSI s
    SaveCursor,
    /// ESC 8 or CSI u
    RestoreCursor,
    /// ESC c
    FullReset,
    /// ENQ, ESC Z, CSI c
    DeviceAttributes,
    /// CSI > c
    SecondaryDeviceAttributes,
    /// CSI 5 n
    StatusReport,
    /// CSI 6 n
    CursorPositionReport,
    /// CSI x
    TerminalParameters,
    InsertBlanks(u16),
    CursorUp(u16),
    CursorDown(u16),
    CursorForward(u16),
    CursorBackward(u16),
    CursorNextLine(u16),
    CursorPrevLine(u16),
    /// 1-based column.
    CursorColumn(u16),
    /// 1-based row.
    CursorRow(u16),
    /// 1-based position.
    CursorPosition { row: u16, col: u16 },
    EraseInDisplay(u16),
    EraseInLine(u16),
    InsertLines(u16),
    DeleteLines(u16),
    DeleteChars(u16),
    EraseChars(u16),
    /// 1-based bounds, zero for "default".
    SetScrollRegion { top: u16, bottom: u16 },
    SetMode(Params),
    ResetMode(Params),
    Sgr(Params),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Ground,
    Escape,
    /// ESC followed by a charset/line-attribute intermediate; one more byte.
    EscapeIntermediate,
    Csi,
    Osc,
    /// ESC seen inside an OSC string.
    OscEscape,
}

/// Incremental VT parser.
#[derive(Debug, Clone, Default)]
pub struct Parser {
    state: State,
    params: Params,
    current: Option<u64>,
    private: Option<u8>,
    intermediate: bool,
    seq_len: usize,
    utf8: Utf8Decoder,
}

impl Parser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the parser is between sequences.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        self.state == State::Ground && !self.utf8.is_pending()
    }

    /// Feed a byte slice, collecting every action produced.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Action> {
        bytes.iter().filter_map(|&b| self.advance(b)).collect()
    }

    /// Feed one byte.
    pub fn advance(&mut self, byte: u8) -> Option<Action> {
        match self.state {
            State::Ground => self.ground(byte),
            State::Escape => self.escape(byte),
            State::EscapeIntermediate => {
                if byte == 0x1B {
                    self.enter_escape();
                } else {
                    self.state = State::Ground;
                }
                None
            }
            State::Csi => self.csi(byte),
            State::Osc | State::OscEscape => self.osc(byte),
        }
    }

    fn enter_escape(&mut self) {
        self.state = State::Escape;
        self.params.clear();
        self.current = None;
        self.private = None;
        self.intermediate = false;
        self.seq_len = 1;
    }

    fn ground(&mut self, byte: u8) -> Option<Action> {
        if byte >= 0x80 || self.utf8.is_pending() {
            if byte < 0x80 {
                // A 7-bit byte interrupts the sequence; it is handled below.
                self.utf8.reset();
            } else {
                return self.utf8.push(byte).map(Action::Print);
            }
        }
        if byte == 0x1B {
            self.enter_escape();
            return None;
        }
        if let Some(action) = execute(byte) {
            return Some(action);
        }
        match byte {
            0x00 | 0x07 | 0x0E | 0x0F => None,
            _ => Some(Action::Print(char::from(byte))),
        }
    }

    fn escape(&mut self, byte: u8) -> Option<Action> {
        self.seq_len += 1;
        self.state = State::Ground;
        let action = match byte {
            b'[' => {
                self.state = State::Csi;
                return None;
            }
            b']' => {
                self.state = State::Osc;
                return None;
            }
            b'#' | b'(' | b')' | b'*' | b'+' => {
                self.state = State::EscapeIntermediate;
                return None;
            }
            0x1B => {
                self.enter_escape();
                return None;
            }
            b'7' => Action::SaveCursor,
            b'8' => Action::RestoreCursor,
            b'D' => Action::Index,
            b'E' => Action::NextLine,
            b'M' => Action::ReverseIndex,
            b'Z' => Action::DeviceAttributes,
            b'c' => Action::FullReset,
            0x00..=0x1F => {
                self.state = State::Escape;
                return execute(byte);
            }
            other => {
                tracing::debug!(byte = other, "ignoring unsupported escape");
                return None;
            }
        };
        Some(action)
    }

    fn csi(&mut self, byte: u8) -> Option<Action> {
        self.seq_len += 1;
        if self.seq_len > MAX_ESCAPE_LEN {
            tracing::debug!(len = self.seq_len, "dropping overlong escape sequence");
            self.state = State::Ground;
            return None;
        }
        match byte {
            b'0'..=b'9' => {
                let digit = u64::from(byte - b'0');
                let value = self.current.unwrap_or(0);
                self.current = Some(value.saturating_mul(10).saturating_add(digit));
                None
            }
            b';' => {
                self.params.push(self.current.take().unwrap_or(0));
                self.current = Some(0);
                None
            }
            b'<'..=b'?' => {
                if self.params.is_empty() && self.current.is_none() && self.private.is_none() {
                    self.private = Some(byte);
                } else {
                    self.intermediate = true;
                }
                None
            }
            0x20..=0x2F | b':' => {
                self.intermediate = true;
                None
            }
            0x40..=0x7E => {
                self.state = State::Ground;
                if let Some(value) = self.current.take() {
                    self.params.push(value);
                }
                if self.intermediate {
                    tracing::debug!(final_byte = byte, "ignoring CSI with intermediates");
                    return None;
                }
                let action = dispatch_csi(byte, self.private, &self.params);
                if action.is_none() {
                    tracing::debug!(
                        final_byte = byte,
                        private = ?self.private,
                        params = ?self.params,
                        "ignoring unsupported CSI"
                    );
                }
                action
            }
            0x1B => {
                self.enter_escape();
                None
            }
            0x00..=0x1F => execute(byte),
            _ => {
                self.state = State::Ground;
                None
            }
        }
    }

    fn osc(&mut self, byte: u8) -> Option<Action> {
        self.seq_len += 1;
        if self.seq_len > MAX_OSC_LEN {
            tracing::debug!("dropping overlong OSC string");
            self.state = State::Ground;
            return None;
        }
        match (self.state, byte) {
            (_, 0x07) => self.state = State::Ground,
            (State::OscEscape, b'\\') => self.state = State::Ground,
            (State::OscEscape, _) => {
                // Not ST: the ESC starts a new sequence.
                self.enter_escape();
                return self.escape(byte);
            }
            (_, 0x1B) => self.state = State::OscEscape,
            _ => {}
        }
        None
    }
}

/// C0 controls with an effect.
fn execute(byte: u8) -> Option<Action> {
    match byte {
        0x05 => Some(Action::DeviceAttributes),
        0x08 => Some(Action::Backspace),
        0x09 => Some(Action::Tab),
        0x0A..=0x0C => Some(Action::LineFeed),
        0x0D => Some(Action::CarriageReturn),
        _ => None,
    }
}

/// Count parameter at `idx`, where zero and missing both mean one.
fn count(params: &[u64], idx: usize) -> u16 {
    let value = params.get(idx).copied().unwrap_or(0);
    u16::try_from(value).unwrap_or(u16::MAX).max(1)
}

/// Plain parameter at `idx`, where missing means zero.
fn param(params: &[u64], idx: usize) -> u16 {
    u16::try_from(params.get(idx).copied().unwrap_or(0)).unwrap_or(u16::MAX)
}

fn dispatch_csi(final_byte: u8, private: Option<u8>, params: &[u64]) -> Option<Action> {
    let action = match (private, final_byte) {
        // Modes are accepted with or without the `?` marker.
        (_, b'h') => Action::SetMode(params.iter().copied().collect()),
        (_, b'l') => Action::ResetMode(params.iter().copied().collect()),
        (Some(b'>'), b'c') => Action::SecondaryDeviceAttributes,
        (Some(_), _) => return None,
        (None, b'@') => Action::InsertBlanks(count(params, 0)),
        (None, b'A') => Action::CursorUp(count(params, 0)),
        (None, b'B' | b'e') => Action::CursorDown(count(params, 0)),
        (None, b'C' | b'a') => Action::CursorForward(count(params, 0)),
        (None, b'D') => Action::CursorBackward(count(params, 0)),
        (None, b'E') => Action::CursorNextLine(count(params, 0)),
        (None, b'F') => Action::CursorPrevLine(count(params, 0)),
        (None, b'G' | b'`') => Action::CursorColumn(count(params, 0)),
        (None, b'H' | b'f') => Action::CursorPosition {
            row: count(params, 0),
            col: count(params, 1),
        },
        (None, b'J') => Action::EraseInDisplay(param(params, 0)),
        (None, b'K') => Action::EraseInLine(param(params, 0)),
        (None, b'L') => Action::InsertLines(count(params, 0)),
        (None, b'M') => Action::DeleteLines(count(params, 0)),
        (None, b'P') => Action::DeleteChars(count(params, 0)),
        (None, b'X') => Action::EraseChars(count(params, 0)),
        (None, b'c') if param(params, 0) == 0 => Action::DeviceAttributes,
        (None, b'd') => Action::CursorRow(count(params, 0)),
        (None, b'm') => Action::Sgr(params.iter().copied().collect()),
        (None, b'n') => match param(params, 0) {
            5 => Action::StatusReport,
            6 => Action::CursorPositionReport,
            _ => return None,
        },
        (None, b'r') => Action::SetScrollRegion {
            top: param(params, 0),
            bottom: param(params, 1),
        },
        (None, b's') => Action::SaveCursor,
        (None, b'u') => Action::RestoreCursor,
        (None, b'x') => Action::TerminalParameters,
        _ => return None,
    };
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn parse(bytes: &[u8]) -> Vec<Action> {
        Parser::new().feed(bytes)
    }

    #[test]
    fn printable_and_controls() {
        assert_eq!(
            parse(b"a\r\n\x08\t"),
            vec![
                Action::Print('a'),
                Action::CarriageReturn,
                Action::LineFeed,
                Action::Backspace,
                Action::Tab,
            ]
        );
    }

    #[test]
    fn bell_and_nul_are_silent() {
        assert!(parse(b"\x07\x00\x0e\x0f").is_empty());
    }

    #[test]
    fn unlisted_controls_print() {
        assert_eq!(parse(b"\x01\x7f"), vec![Action::Print('\x01'), Action::Print('\x7f')]);
    }

    #[test]
    fn cursor_position_defaults() {
        assert_eq!(
            parse(b"\x1b[H\x1b[5;10H\x1b[;7f"),
            vec![
                Action::CursorPosition { row: 1, col: 1 },
                Action::CursorPosition { row: 5, col: 10 },
                Action::CursorPosition { row: 1, col: 7 },
            ]
        );
    }

    #[test]
    fn zero_counts_mean_one() {
        assert_eq!(parse(b"\x1b[0A\x1b[B"), vec![Action::CursorUp(1), Action::CursorDown(1)]);
    }

    #[test]
    fn private_modes_and_cookie_params() {
        assert_eq!(
            parse(b"\x1b[?1049h\x1b[?1155;1234567890123456h\x1b[?47l"),
            vec![
                Action::SetMode(smallvec![1049]),
                Action::SetMode(smallvec![1155, 1_234_567_890_123_456]),
                Action::ResetMode(smallvec![47]),
            ]
        );
    }

    #[test]
    fn empty_trailing_param_is_zero() {
        assert_eq!(parse(b"\x1b[?1150;h"), vec![Action::SetMode(smallvec![1150, 0])]);
    }

    #[test]
    fn sgr_params_are_preserved() {
        assert_eq!(parse(b"\x1b[1;31;44m"), vec![Action::Sgr(smallvec![1, 31, 44])]);
        assert_eq!(parse(b"\x1b[m"), vec![Action::Sgr(smallvec![])]);
    }

    #[test]
    fn device_queries() {
        assert_eq!(
            parse(b"\x05\x1bZ\x1b[c\x1b[>c\x1b[5n\x1b[6n\x1b[x"),
            vec![
                Action::DeviceAttributes,
                Action::DeviceAttributes,
                Action::DeviceAttributes,
                Action::SecondaryDeviceAttributes,
                Action::StatusReport,
                Action::CursorPositionReport,
                Action::TerminalParameters,
            ]
        );
    }

    #[test]
    fn unknown_sequences_are_consumed() {
        assert_eq!(parse(b"\x1b[5zA\x1b=B\x1b(0C"), vec![
            Action::Print('A'),
            Action::Print('B'),
            Action::Print('C'),
        ]);
    }

    #[test]
    fn overlong_sequence_is_dropped() {
        let mut bytes = b"\x1b[".to_vec();
        bytes.extend(std::iter::repeat_n(b'1', 40));
        bytes.extend_from_slice(b"Hz");
        let actions = parse(&bytes);
        assert!(!actions.iter().any(|a| matches!(a, Action::CursorPosition { .. })));
        assert_eq!(actions.last(), Some(&Action::Print('z')));
    }

    #[test]
    fn osc_is_swallowed() {
        assert_eq!(parse(b"\x1b]0;title\x07x"), vec![Action::Print('x')]);
        assert_eq!(parse(b"\x1b]2;t\x1b\\y"), vec![Action::Print('y')]);
    }

    #[test]
    fn controls_inside_csi_execute() {
        assert_eq!(
            parse(b"\x1b[2\rA"),
            vec![Action::CarriageReturn, Action::CursorUp(2)]
        );
    }

    #[test]
    fn utf8_in_ground() {
        assert_eq!(parse("é✓".as_bytes()), vec![Action::Print('é'), Action::Print('✓')]);
    }

    #[test]
    fn escape_interrupts_partial_utf8() {
        assert_eq!(parse(b"\xE2\x9C\x1b[A"), vec![Action::CursorUp(1)]);
    }

    #[test]
    fn split_feed_matches_whole_feed() {
        let bytes = b"ab\x1b[2;3HZ\x1b[?1049h\xC3\xA9";
        let whole = parse(bytes);
        let mut parser = Parser::new();
        let mut split = Vec::new();
        for chunk in bytes.chunks(3) {
            split.extend(parser.feed(chunk));
        }
        assert_eq!(whole, split);
        assert!(parser.is_ground());
    }
}
