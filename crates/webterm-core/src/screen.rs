//! Screen: row-major cell matrix plus per-row prompt metadata.
//!
//! The screen owns a flat vector of cells indexed by `(row, col)` and one
//! optional [`RowMeta`] per row. Metadata travels with its row through
//! scrolls and line insertion, and is dropped when a whole row is erased.

use crate::cell::{self, Cell};

/// Metadata attached to a row that started at a shell prompt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowMeta {
    /// Working directory reported by the shell's prompt hook.
    pub directory: String,
    /// Zero for the prompt row itself, incremented for each wrapped row.
    pub continuation: u16,
}

impl RowMeta {
    #[must_use]
    pub fn prompt(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            continuation: 0,
        }
    }

    /// Metadata for the row a wrapped prompt line continues onto.
    #[must_use]
    pub fn continued(&self) -> Self {
        Self {
            directory: self.directory.clone(),
            continuation: self.continuation.saturating_add(1),
        }
    }

    #[must_use]
    pub fn is_continuation(&self) -> bool {
        self.continuation > 0
    }
}

/// Fixed-size screen of cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screen {
    cells: Vec<Cell>,
    meta: Vec<Option<RowMeta>>,
    width: u16,
    height: u16,
}

impl Screen {
    /// Create a blank screen. Zero dimensions are raised to one.
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            cells: vec![Cell::BLANK; usize::from(width) * usize::from(height)],
            meta: vec![None; usize::from(height)],
            width,
            height,
        }
    }

    #[must_use]
    pub fn width(&self) -> u16 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u16 {
        self.height
    }

    #[inline]
    fn index(&self, row: u16, col: u16) -> usize {
        usize::from(row) * usize::from(self.width) + usize::from(col)
    }

    /// Cell at `(row, col)`, or `None` when out of bounds.
    #[must_use]
    pub fn cell(&self, row: u16, col: u16) -> Option<Cell> {
        (row < self.height && col < self.width).then(|| self.cells[self.index(row, col)])
    }

    /// Overwrite the cell at `(row, col)`. Out-of-bounds writes are ignored.
    pub fn set_cell(&mut self, row: u16, col: u16, cell: Cell) {
        if row < self.height && col < self.width {
            let idx = self.index(row, col);
            self.cells[idx] = cell;
        }
    }

    /// Cells of `row`.
    #[must_use]
    pub fn row(&self, row: u16) -> Option<&[Cell]> {
        if row < self.height {
            let start = self.index(row, 0);
            Some(&self.cells[start..start + usize::from(self.width)])
        } else {
            None
        }
    }

    /// Display text of `row` with trailing blanks trimmed.
    #[must_use]
    pub fn row_text(&self, row: u16) -> String {
        self.row(row).map(cell::row_text).unwrap_or_default()
    }

    #[must_use]
    pub fn meta(&self, row: u16) -> Option<&RowMeta> {
        self.meta.get(usize::from(row)).and_then(Option::as_ref)
    }

    pub fn set_meta(&mut self, row: u16, meta: Option<RowMeta>) {
        if let Some(slot) = self.meta.get_mut(usize::from(row)) {
            *slot = meta;
        }
    }

    // ── Erase operations ────────────────────────────────────────────

    /// Erase the linear range from `(row1, col1)` through `(row2, col2)`
    /// inclusive, in reading order. Row metadata is left untouched.
    pub fn erase_range(&mut self, row1: u16, col1: u16, row2: u16, col2: u16) {
        if row1 >= self.height {
            return;
        }
        let last = self.cells.len() - 1;
        let start = self.index(row1, col1.min(self.width - 1));
        let end = self
            .index(row2.min(self.height - 1), col2.min(self.width - 1))
            .min(last);
        if start <= end {
            self.cells[start..=end].fill(Cell::BLANK);
        }
    }

    /// Erase whole rows `top..=bottom`, including their metadata.
    pub fn erase_lines(&mut self, top: u16, bottom: u16) {
        if top >= self.height {
            return;
        }
        let bottom = bottom.min(self.height - 1);
        if top > bottom {
            return;
        }
        let start = self.index(top, 0);
        let end = self.index(bottom, 0) + usize::from(self.width);
        self.cells[start..end].fill(Cell::BLANK);
        for meta in &mut self.meta[usize::from(top)..=usize::from(bottom)] {
            *meta = None;
        }
    }

    /// Erase everything.
    pub fn clear(&mut self) {
        self.cells.fill(Cell::BLANK);
        self.meta.fill(None);
    }

    /// ECH: erase `count` cells starting at `(row, col)` without moving others.
    pub fn erase_chars(&mut self, row: u16, col: u16, count: u16) {
        if row >= self.height || col >= self.width || count == 0 {
            return;
        }
        let end = col.saturating_add(count).min(self.width);
        let start = self.index(row, col);
        let stop = self.index(row, 0) + usize::from(end);
        self.cells[start..stop].fill(Cell::BLANK);
    }

    // ── Scrolling ───────────────────────────────────────────────────

    /// Move rows `top + 1..=bottom` up one row and blank `bottom`.
    ///
    /// A one-row region is simply blanked.
    pub fn scroll_up(&mut self, top: u16, bottom: u16) {
        if top > bottom || bottom >= self.height {
            return;
        }
        let width = usize::from(self.width);
        let start = self.index(top, 0);
        let end = self.index(bottom, 0) + width;
        self.cells[start..end].rotate_left(width);
        self.meta[usize::from(top)..=usize::from(bottom)].rotate_left(1);
        self.erase_lines(bottom, bottom);
    }

    /// Move rows `top..bottom` down one row and blank `top`.
    pub fn scroll_down(&mut self, top: u16, bottom: u16) {
        if top > bottom || bottom >= self.height {
            return;
        }
        let width = usize::from(self.width);
        let start = self.index(top, 0);
        let end = self.index(bottom, 0) + width;
        self.cells[start..end].rotate_right(width);
        self.meta[usize::from(top)..=usize::from(bottom)].rotate_right(1);
        self.erase_lines(top, top);
    }

    /// Copy `count` whole rows (cells and metadata) starting at `src` to `dst`.
    pub fn copy_rows(&mut self, src: u16, dst: u16, count: u16) {
        let count = count
            .min(self.height.saturating_sub(src))
            .min(self.height.saturating_sub(dst));
        if count == 0 || src == dst {
            return;
        }
        let width = usize::from(self.width);
        let from = self.index(src, 0);
        let to = self.index(dst, 0);
        self.cells
            .copy_within(from..from + usize::from(count) * width, to);
        let (src, dst, count) = (usize::from(src), usize::from(dst), usize::from(count));
        let moved: Vec<Option<RowMeta>> = self.meta[src..src + count].to_vec();
        self.meta[dst..dst + count].clone_from_slice(&moved);
    }

    // ── Character editing ───────────────────────────────────────────

    /// ICH: shift the rest of the row right by one from `col`, inserting a blank.
    pub fn insert_blank(&mut self, row: u16, col: u16) {
        if row >= self.height || col >= self.width {
            return;
        }
        let start = self.index(row, col);
        let end = self.index(row, 0) + usize::from(self.width);
        self.cells[start..end].rotate_right(1);
        self.cells[start] = Cell::BLANK;
    }

    /// DCH: delete `count` cells at `col`, pulling the rest of the row left.
    pub fn delete_chars(&mut self, row: u16, col: u16, count: u16) {
        if row >= self.height || col >= self.width || count == 0 {
            return;
        }
        let start = self.index(row, col);
        let end = self.index(row, 0) + usize::from(self.width);
        let count = usize::from(count).min(end - start);
        self.cells[start..end].rotate_left(count);
        self.cells[end - count..end].fill(Cell::BLANK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Style;

    fn write(screen: &mut Screen, row: u16, text: &str) {
        for (col, ch) in text.chars().enumerate() {
            screen.set_cell(row, col as u16, Cell::new(ch, Style::NORMAL));
        }
    }

    #[test]
    fn new_screen_is_blank() {
        let screen = Screen::new(4, 3);
        assert_eq!(screen.width(), 4);
        assert_eq!(screen.height(), 3);
        assert!((0..3).all(|row| screen.row_text(row).is_empty()));
        assert!(screen.meta(0).is_none());
    }

    #[test]
    fn zero_size_is_raised() {
        let screen = Screen::new(0, 0);
        assert_eq!((screen.width(), screen.height()), (1, 1));
    }

    #[test]
    fn erase_range_spans_rows_inclusively() {
        let mut screen = Screen::new(3, 2);
        write(&mut screen, 0, "abc");
        write(&mut screen, 1, "def");
        screen.erase_range(0, 1, 1, 0);
        assert_eq!(screen.row_text(0), "a");
        assert_eq!(screen.row_text(1), " ef");
    }

    #[test]
    fn erase_lines_drops_meta() {
        let mut screen = Screen::new(3, 2);
        write(&mut screen, 1, "xyz");
        screen.set_meta(1, Some(RowMeta::prompt("/tmp")));
        screen.erase_lines(1, 1);
        assert!(screen.row_text(1).is_empty());
        assert!(screen.meta(1).is_none());
    }

    #[test]
    fn scroll_up_moves_meta_with_rows() {
        let mut screen = Screen::new(2, 3);
        write(&mut screen, 0, "a");
        write(&mut screen, 1, "b");
        write(&mut screen, 2, "c");
        screen.set_meta(1, Some(RowMeta::prompt("/home")));
        screen.scroll_up(0, 2);
        assert_eq!(screen.row_text(0), "b");
        assert_eq!(screen.row_text(1), "c");
        assert!(screen.row_text(2).is_empty());
        assert_eq!(screen.meta(0).map(|m| m.directory.as_str()), Some("/home"));
        assert!(screen.meta(2).is_none());
    }

    #[test]
    fn scroll_down_blanks_top() {
        let mut screen = Screen::new(2, 3);
        write(&mut screen, 0, "a");
        write(&mut screen, 1, "b");
        screen.scroll_down(0, 2);
        assert!(screen.row_text(0).is_empty());
        assert_eq!(screen.row_text(1), "a");
        assert_eq!(screen.row_text(2), "b");
    }

    #[test]
    fn copy_rows_moves_block_up() {
        let mut screen = Screen::new(2, 4);
        for (row, text) in ["a", "b", "c", "d"].iter().enumerate() {
            write(&mut screen, row as u16, text);
        }
        screen.copy_rows(2, 0, 2);
        assert_eq!(screen.row_text(0), "c");
        assert_eq!(screen.row_text(1), "d");
    }

    #[test]
    fn insert_and_delete_chars() {
        let mut screen = Screen::new(5, 1);
        write(&mut screen, 0, "abcde");
        screen.insert_blank(0, 1);
        assert_eq!(screen.row_text(0), "a bcd");
        screen.delete_chars(0, 0, 2);
        assert_eq!(screen.row_text(0), "bcd");
        screen.delete_chars(0, 1, 10);
        assert_eq!(screen.row_text(0), "b");
    }

    #[test]
    fn erase_chars_stops_at_row_end() {
        let mut screen = Screen::new(4, 2);
        write(&mut screen, 0, "abcd");
        write(&mut screen, 1, "efgh");
        screen.erase_chars(0, 2, 9);
        assert_eq!(screen.row_text(0), "ab");
        assert_eq!(screen.row_text(1), "efgh");
    }

    #[test]
    fn continuation_meta_increments() {
        let meta = RowMeta::prompt("/src");
        assert!(!meta.is_continuation());
        let next = meta.continued();
        assert_eq!(next.continuation, 1);
        assert_eq!(next.directory, "/src");
    }
}
