//! Screen diff engine.
//!
//! `ScreenBuf` remembers what the viewer was last sent: copies of both
//! screens, the cursor, and how much scrollback has been reported. Each
//! [`ScreenBuf::update`] compares the live state against that snapshot and
//! returns only the rows that changed plus any new scrollback lines, then
//! adopts the live state as the new snapshot.

use crate::cell;
use crate::event::ChangedRow;
use crate::markup::{self, PromptFormat};
use crate::screen::{RowMeta, Screen};
use crate::scrollback::{Scrollback, ScrollbackEntry};

/// Live terminal state handed to [`ScreenBuf::update`].
#[derive(Debug, Clone, Copy)]
pub struct ScreenView<'a> {
    pub active_rows: u16,
    pub width: u16,
    pub height: u16,
    /// `(row, col)` of the cursor.
    pub cursor: (u16, u16),
    pub main: &'a Screen,
    /// The alternate screen, only while it is displayed.
    pub alt: Option<&'a Screen>,
}

/// Result of one diff.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScreenDiff {
    pub full_update: bool,
    pub rows: Vec<ChangedRow>,
    pub scrollback: Vec<ScrollbackEntry>,
}

/// Last-reported snapshot plus the scrollback ring.
#[derive(Debug, Clone)]
pub struct ScreenBuf {
    prompt: Option<PromptFormat>,
    size: Option<(u16, u16)>,
    cursor: Option<(u16, u16)>,
    main: Option<Screen>,
    alt: Option<Screen>,
    scrollback: Scrollback,
    full_update: bool,
}

impl ScreenBuf {
    #[must_use]
    pub fn new(prompt: Option<PromptFormat>, max_scroll_lines: usize) -> Self {
        Self {
            prompt,
            size: None,
            cursor: None,
            main: None,
            alt: None,
            scrollback: Scrollback::new(max_scroll_lines),
            full_update: true,
        }
    }

    #[must_use]
    pub fn prompt(&self) -> Option<&PromptFormat> {
        self.prompt.as_ref()
    }

    /// Length of the prompt prefix.
    #[must_use]
    pub fn pre_offset(&self) -> usize {
        self.prompt.as_ref().map_or(0, PromptFormat::pre_offset)
    }

    #[must_use]
    pub fn scrollback(&self) -> &Scrollback {
        &self.scrollback
    }

    /// Column where command text begins on `line`, zero if not a prompt row.
    #[must_use]
    pub fn prompt_offset(&self, line: &str, meta: Option<&RowMeta>) -> usize {
        markup::prompt_offset(line, self.prompt.as_ref(), meta)
    }

    /// Move one row of the main screen into scrollback.
    ///
    /// A prompt row opens a new entry and carries command markup; any other
    /// row joins the current entry.
    pub fn scroll_buf_up(&mut self, line: String, meta: Option<&RowMeta>) {
        let offset = self.prompt_offset(&line, meta);
        let (directory, markup) = if offset > 0 {
            let index = self.scrollback.begin_entry();
            let directory = meta.map(|meta| meta.directory.clone()).unwrap_or_default();
            let markup =
                markup::command_markup(index, &directory, self.pre_offset(), offset, &line);
            (directory, Some(markup))
        } else {
            (String::new(), None)
        };
        self.scrollback.push(ScrollbackEntry {
            entry_index: self.scrollback.entry_index(),
            prompt_offset: offset,
            directory,
            markup,
            line,
        });
    }

    /// Resend everything on the next update.
    pub fn reconnect(&mut self) {
        self.scrollback.rewind();
        self.full_update = true;
    }

    /// Force a full repaint on the next update.
    pub fn force_full_update(&mut self) {
        self.full_update = true;
    }

    /// Retract the newest scrollback entry (see [`Scrollback::clear_last_entry`]).
    pub fn clear_last_entry(&mut self, guard: Option<u64>) -> bool {
        self.scrollback.clear_last_entry(guard)
    }

    /// Drop all scrollback.
    pub fn clear_scrollback(&mut self) {
        self.scrollback.clear();
        self.full_update = true;
    }

    /// Diff `view` against the snapshot and adopt it.
    ///
    /// On the main screen only the active rows are compared; on the alternate
    /// screen every row is. Rows under the old or new cursor position are
    /// reported when the cursor moved.
    pub fn update(&mut self, view: ScreenView<'_>) -> ScreenDiff {
        let mut full_update = std::mem::take(&mut self.full_update);
        if self.size != Some((view.width, view.height)) {
            self.size = Some((view.width, view.height));
            full_update = true;
        }
        if view.alt.is_some() != self.alt.is_some() {
            full_update = true;
        }

        let (screen, old, row_count) = match view.alt {
            Some(alt) => (alt, self.alt.as_ref(), view.height),
            None => (view.main, self.main.as_ref(), view.active_rows),
        };
        let cursor_moved = self.cursor != Some(view.cursor);
        let old_cursor_row = self.cursor.map(|(row, _)| row);

        let mut rows = Vec::new();
        for row in 0..row_count.min(screen.height()) {
            let Some(cells) = screen.row(row) else {
                continue;
            };
            let changed = full_update || old.and_then(|old| old.row(row)) != Some(cells);
            let under_cursor =
                cursor_moved && (view.cursor.0 == row || old_cursor_row == Some(row));
            if changed || under_cursor {
                let line = cell::row_text(cells);
                rows.push(ChangedRow {
                    row,
                    prompt_offset: self.prompt_offset(&line, screen.meta(row)),
                    text: cell::encode_row(cells),
                });
            }
        }

        self.cursor = Some(view.cursor);
        self.main = Some(view.main.clone());
        self.alt = view.alt.cloned();

        ScreenDiff {
            full_update,
            rows,
            scrollback: self.scrollback.take_unreported(),
        }
    }
}
