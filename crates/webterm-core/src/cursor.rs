//! Terminal cursor: position, pending wrap, and the scroll region.

/// Terminal cursor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    /// Current row (0-indexed from top of the screen).
    pub row: u16,
    /// Current column (0-indexed from left).
    pub col: u16,
    /// Pending wrap: the last column was just written and the next printable
    /// character moves to the start of the following line first.
    pub pending_wrap: bool,
}

impl Cursor {
    /// Create a cursor at the given position.
    #[must_use]
    pub fn at(row: u16, col: u16) -> Self {
        Self {
            row,
            col,
            pending_wrap: false,
        }
    }

    /// Clamp the cursor position to the given screen bounds.
    pub fn clamp(&mut self, rows: u16, cols: u16) {
        self.row = self.row.min(rows.saturating_sub(1));
        self.col = self.col.min(cols.saturating_sub(1));
        self.pending_wrap = false;
    }

    pub fn carriage_return(&mut self) {
        self.col = 0;
        self.pending_wrap = false;
    }
}

/// Saved cursor position for DECSC / DECRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SavedCursor {
    pub row: u16,
    pub col: u16,
}

impl SavedCursor {
    #[must_use]
    pub fn save(cursor: &Cursor) -> Self {
        Self {
            row: cursor.row,
            col: cursor.col,
        }
    }

    /// Restore the saved position, clamped to the current bounds.
    pub fn restore(&self, cursor: &mut Cursor, rows: u16, cols: u16) {
        cursor.row = self.row;
        cursor.col = self.col;
        cursor.clamp(rows, cols);
    }
}

/// Inclusive scroll region `top..=bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollRegion {
    top: u16,
    bottom: u16,
}

impl ScrollRegion {
    /// Region covering a whole screen of `rows` rows.
    #[must_use]
    pub fn full(rows: u16) -> Self {
        Self {
            top: 0,
            bottom: rows.saturating_sub(1),
        }
    }

    /// DECSTBM with 1-based parameters where zero means "default".
    ///
    /// Returns `None` when the request does not describe a region of at
    /// least two rows inside the screen.
    #[must_use]
    pub fn from_params(top: u16, bottom: u16, rows: u16) -> Option<Self> {
        let top = top.max(1) - 1;
        let bottom = if bottom == 0 { rows } else { bottom.min(rows) } - 1;
        (top < bottom).then_some(Self { top, bottom })
    }

    #[must_use]
    pub fn top(&self) -> u16 {
        self.top
    }

    #[must_use]
    pub fn bottom(&self) -> u16 {
        self.bottom
    }

    #[must_use]
    pub fn contains(&self, row: u16) -> bool {
        (self.top..=self.bottom).contains(&row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cursor_at_origin() {
        let c = Cursor::default();
        assert_eq!((c.row, c.col), (0, 0));
        assert!(!c.pending_wrap);
    }

    #[test]
    fn cursor_clamp_to_bounds() {
        let mut c = Cursor::at(100, 200);
        c.pending_wrap = true;
        c.clamp(24, 80);
        assert_eq!((c.row, c.col), (23, 79));
        assert!(!c.pending_wrap);
    }

    #[test]
    fn save_restore_clamps() {
        let saved = SavedCursor::save(&Cursor::at(20, 70));
        let mut cursor = Cursor::default();
        saved.restore(&mut cursor, 10, 40);
        assert_eq!((cursor.row, cursor.col), (9, 39));
    }

    #[test]
    fn scroll_region_from_params() {
        let region = ScrollRegion::from_params(2, 5, 24).expect("valid region");
        assert_eq!((region.top(), region.bottom()), (1, 4));
        assert!(region.contains(4));
        assert!(!region.contains(5));

        let full = ScrollRegion::from_params(0, 0, 24).expect("default region");
        assert_eq!(full, ScrollRegion::full(24));

        assert!(ScrollRegion::from_params(5, 5, 24).is_none());
        assert!(ScrollRegion::from_params(30, 0, 24).is_none());
    }
}
