//! Terminal cell: a code point packed together with its style.
//!
//! A cell is a single `u32`. The low 24 bits hold the Unicode scalar value and
//! the high byte holds the [`Style`]. A zero cell is "never written" and is
//! trimmed from the end of rendered rows.
//!
//! This module also owns the row encoding used on the wire: a row is either a
//! plain string (every cell in the default style) or a list of styled spans.

use bitflags::bitflags;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

const CHAR_MASK: u32 = 0x00FF_FFFF;
const STYLE_SHIFT: u32 = 24;

/// Packed style byte: foreground in bits 0-2, bold in bit 3, background in
/// bits 4-6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Style(u8);

impl Style {
    /// Style of freshly reset text: white foreground, no background.
    pub const NORMAL: Style = Style(0x07);
    /// SGR 7: black on white.
    pub const INVERSE: Style = Style(0x70);

    const FG_MASK: u8 = 0x07;
    const BOLD_BIT: u8 = 0x08;
    const BG_MASK: u8 = 0x70;

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x7F)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Foreground palette index (0-7).
    #[must_use]
    pub const fn fg(self) -> u8 {
        self.0 & Self::FG_MASK
    }

    /// Background palette index (0-7). Zero is the default background.
    #[must_use]
    pub const fn bg(self) -> u8 {
        (self.0 & Self::BG_MASK) >> 4
    }

    #[must_use]
    pub const fn is_bold(self) -> bool {
        self.0 & Self::BOLD_BIT != 0
    }

    /// SGR 30-37: replace the foreground, keep bold and background.
    #[must_use]
    pub const fn with_fg(self, color: u8) -> Self {
        Self((self.0 & !Self::FG_MASK) | (color & Self::FG_MASK))
    }

    /// SGR 40-47: replace the background, keep bold and foreground.
    #[must_use]
    pub const fn with_bg(self, color: u8) -> Self {
        Self((self.0 & !Self::BG_MASK) | ((color & 0x07) << 4))
    }

    #[must_use]
    pub const fn with_bold(self) -> Self {
        Self(self.0 | Self::BOLD_BIT)
    }

    /// Transport tags for this style. Any non-default background is reported
    /// as inverse.
    #[must_use]
    pub fn tags(self) -> StyleTags {
        let mut tags = StyleTags::empty();
        if self.is_bold() {
            tags |= StyleTags::BOLD;
        }
        if self.bg() != 0 {
            tags |= StyleTags::INVERSE;
        }
        tags
    }
}

bitflags! {
    /// Style tags understood by the viewer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StyleTags: u8 {
        const BOLD    = 1 << 0;
        const INVERSE = 1 << 1;
    }
}

impl Serialize for StyleTags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.bits().count_ones() as usize))?;
        if self.contains(StyleTags::BOLD) {
            seq.serialize_element("bold")?;
        }
        if self.contains(StyleTags::INVERSE) {
            seq.serialize_element("inverse")?;
        }
        seq.end()
    }
}

/// A single cell of a screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Cell(u32);

impl Cell {
    /// A cell that was never written (or was erased).
    pub const BLANK: Cell = Cell(0);

    #[must_use]
    pub fn new(ch: char, style: Style) -> Self {
        Self((u32::from(ch) & CHAR_MASK) | (u32::from(style.bits()) << STYLE_SHIFT))
    }

    /// Raw code point stored in the cell.
    #[must_use]
    pub const fn code_point(self) -> u32 {
        self.0 & CHAR_MASK
    }

    #[must_use]
    pub const fn style(self) -> Style {
        Style::from_bits((self.0 >> STYLE_SHIFT) as u8)
    }

    #[must_use]
    pub const fn is_blank(self) -> bool {
        self.code_point() == 0
    }

    /// Character shown for this cell.
    #[must_use]
    pub fn display_char(self) -> char {
        display_char(self.code_point())
    }
}

/// Map a stored code point to the character the viewer draws.
///
/// Controls (including interior NULs) draw as a space, DEL and the C1 range
/// draw as `?`.
#[must_use]
pub fn display_char(code_point: u32) -> char {
    match code_point {
        0x0A => '\n',
        0x00..=0x1F => ' ',
        0x7F..=0xA0 => '?',
        other => char::from_u32(other).unwrap_or('?'),
    }
}

/// Cells of `row` with trailing never-written cells removed.
#[must_use]
pub fn trim_blank(row: &[Cell]) -> &[Cell] {
    let end = row
        .iter()
        .rposition(|cell| !cell.is_blank())
        .map_or(0, |idx| idx + 1);
    &row[..end]
}

/// Render a row as display text, trailing blanks trimmed.
///
/// One character is produced per cell, so character offsets in the result
/// are column numbers.
#[must_use]
pub fn row_text(row: &[Cell]) -> String {
    trim_blank(row).iter().map(|cell| cell.display_char()).collect()
}

// ── Row encoding ────────────────────────────────────────────────────

/// A run of characters sharing the same style tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Span {
    pub tags: StyleTags,
    pub text: String,
}

/// Encoded content of one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RowText {
    /// Every cell carries the default tags.
    Plain(String),
    /// At least one styled run.
    Styled(Vec<Span>),
}

impl RowText {
    /// Concatenated text regardless of styling.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            RowText::Plain(text) => text.clone(),
            RowText::Styled(spans) => spans.iter().map(|span| span.text.as_str()).collect(),
        }
    }
}

/// Encode a row into style-tagged spans, trailing blanks trimmed.
#[must_use]
pub fn encode_row(row: &[Cell]) -> RowText {
    let mut spans: Vec<Span> = Vec::new();
    for cell in trim_blank(row) {
        let tags = cell.style().tags();
        match spans.last_mut() {
            Some(last) if last.tags == tags => last.text.push(cell.display_char()),
            _ => spans.push(Span {
                tags,
                text: cell.display_char().to_string(),
            }),
        }
    }
    match spans.as_slice() {
        [] => RowText::Plain(String::new()),
        [only] if only.tags.is_empty() => RowText::Plain(only.text.clone()),
        _ => RowText::Styled(spans),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(text: &str, style: Style) -> Vec<Cell> {
        text.chars().map(|ch| Cell::new(ch, style)).collect()
    }

    #[test]
    fn cell_packs_char_and_style() {
        let style = Style::NORMAL.with_bold().with_bg(4);
        let cell = Cell::new('é', style);
        assert_eq!(cell.code_point(), 'é' as u32);
        assert_eq!(cell.style(), style);
        assert!(cell.style().is_bold());
        assert_eq!(cell.style().bg(), 4);
        assert_eq!(cell.style().fg(), 7);
    }

    #[test]
    fn fg_and_bg_are_independent() {
        let style = Style::NORMAL.with_bg(2).with_fg(1);
        assert_eq!(style.fg(), 1);
        assert_eq!(style.bg(), 2);
        assert_eq!(style.with_fg(3).bg(), 2);
    }

    #[test]
    fn display_char_maps_controls() {
        assert_eq!(display_char(0x00), ' ');
        assert_eq!(display_char(0x07), ' ');
        assert_eq!(display_char(0x7F), '?');
        assert_eq!(display_char(0x9B), '?');
        assert_eq!(display_char('a' as u32), 'a');
        assert_eq!(display_char(0x0A), '\n');
    }

    #[test]
    fn row_text_trims_trailing_blanks_only() {
        let mut row = vec![Cell::BLANK; 6];
        row[1] = Cell::new('a', Style::NORMAL);
        row[3] = Cell::new('b', Style::NORMAL);
        assert_eq!(row_text(&row), " a b");
    }

    #[test]
    fn default_row_encodes_as_plain() {
        let mut row = cells("ls -l", Style::NORMAL);
        row.extend([Cell::BLANK; 3]);
        assert_eq!(encode_row(&row), RowText::Plain("ls -l".to_string()));
        assert_eq!(encode_row(&[Cell::BLANK; 4]), RowText::Plain(String::new()));
    }

    #[test]
    fn styled_row_groups_runs() {
        let mut row = cells("ab", Style::NORMAL);
        row.extend(cells("cd", Style::INVERSE));
        row.extend(cells("e", Style::NORMAL.with_bold()));
        let RowText::Styled(spans) = encode_row(&row) else {
            panic!("expected styled row");
        };
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].text, "ab");
        assert!(spans[0].tags.is_empty());
        assert_eq!(spans[1].tags, StyleTags::INVERSE);
        assert_eq!(spans[2].tags, StyleTags::BOLD);
    }

    #[test]
    fn tags_serialize_as_names() {
        let json = serde_json::to_string(&(StyleTags::BOLD | StyleTags::INVERSE))
            .expect("serialize tags");
        assert_eq!(json, r#"["bold","inverse"]"#);
        let plain = serde_json::to_string(&RowText::Plain("x".into())).expect("serialize row");
        assert_eq!(plain, r#""x""#);
    }
}
