//! One terminal session: parser, screens, cursor, and the diff engine.
//!
//! [`Terminal`] is the host-agnostic ownership boundary for a session. The
//! host feeds it pty output with [`Terminal::write`], writes the bytes from
//! [`Terminal::read`] back to the pty, and forwards whatever
//! [`Terminal::drain_events`] returns to the viewer.
//!
//! The main screen is line oriented: [`Terminal::update`] first moves every
//! row above the most recent prompt into scrollback, so the live screen always
//! starts at the command being typed or run.

use crate::cell::{self, Cell, Style};
use crate::cookie::{cookie_matches, make_cookie};
use crate::cursor::{Cursor, SavedCursor, ScrollRegion};
use crate::directive::{
    self, DEFAULT_MAX_DIRECTIVE_BYTES, DEFAULT_MAX_FILE_BYTES, DirectiveBuffer, DirectiveCode,
    TagStripper, TextExtractor,
};
use crate::error::PasteError;
use crate::event::{RowUpdate, TerminalEvent};
use crate::markup::PromptFormat;
use crate::parser::{Action, Parser};
use crate::paste::{self, CommandLine, PasteOptions};
use crate::screen::{RowMeta, Screen};
use crate::screen_buf::{ScreenBuf, ScreenView};
use crate::scrollback::{DEFAULT_SCROLLBACK_LINES, Scrollback};
use std::path::Path;

pub const DEFAULT_WIDTH: u16 = 80;
pub const DEFAULT_HEIGHT: u16 = 25;

/// Private modes that switch to the alternate screen.
const ALTERNATE_SCREEN_MODES: [u64; 3] = [47, 1047, 1049];

const REPLY_DEVICE_ATTRIBUTES: &[u8] = b"\x1b[?6c";
const REPLY_SECONDARY_ATTRIBUTES: &[u8] = b"\x1b[>0;0;0c";
const REPLY_STATUS_OK: &[u8] = b"\x1b[0n";
const REPLY_TERMINAL_PARAMETERS: &[u8] = b"\x1b[0;0;0;0;0;0;0x";

/// Configuration for [`Terminal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalConfig {
    pub width: u16,
    pub height: u16,
    /// Secret that authenticates directive payloads.
    pub cookie: String,
    pub prompt: Option<PromptFormat>,
    pub max_scroll_lines: usize,
    pub max_directive_bytes: usize,
    /// Largest file an `edit_file` directive may read.
    pub max_file_bytes: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            cookie: make_cookie(),
            prompt: None,
            max_scroll_lines: DEFAULT_SCROLLBACK_LINES,
            max_directive_bytes: DEFAULT_MAX_DIRECTIVE_BYTES,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl TerminalConfig {
    #[must_use]
    pub fn with_size(mut self, width: u16, height: u16) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = cookie.into();
        self
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: PromptFormat) -> Self {
        self.prompt = Some(prompt);
        self
    }

    #[must_use]
    pub fn with_max_scroll_lines(mut self, lines: usize) -> Self {
        self.max_scroll_lines = lines;
        self
    }

    #[must_use]
    pub fn with_max_directive_bytes(mut self, bytes: usize) -> Self {
        self.max_directive_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_max_file_bytes(mut self, bytes: usize) -> Self {
        self.max_file_bytes = bytes;
        self
    }
}

/// Where a click-paste runs: the host name counted as local and an extra
/// directory searched for commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasteEnv<'a> {
    pub local_host: &'a str,
    pub search_dir: Option<&'a Path>,
}

/// Emulator state for one session.
#[derive(Debug)]
pub struct Terminal {
    name: String,
    cookie: String,
    max_directive_bytes: usize,
    max_file_bytes: usize,
    width: u16,
    height: u16,
    parser: Parser,
    main: Screen,
    alt: Screen,
    alt_mode: bool,
    cursor: Cursor,
    saved_cursor: SavedCursor,
    region: ScrollRegion,
    style: Style,
    active_rows: u16,
    replies: Vec<u8>,
    directive: Option<DirectiveBuffer>,
    screen_buf: ScreenBuf,
    events: Vec<TerminalEvent>,
    needs_updating: bool,
    pending_reconnect: Option<String>,
    extractor: Box<dyn TextExtractor>,
}

impl Terminal {
    #[must_use]
    pub fn new(name: impl Into<String>, config: TerminalConfig) -> Self {
        let width = config.width.max(1);
        let height = config.height.max(1);
        Self {
            name: name.into(),
            cookie: config.cookie,
            max_directive_bytes: config.max_directive_bytes,
            max_file_bytes: config.max_file_bytes,
            width,
            height,
            parser: Parser::new(),
            main: Screen::new(width, height),
            alt: Screen::new(width, height),
            alt_mode: false,
            cursor: Cursor::default(),
            saved_cursor: SavedCursor::default(),
            region: ScrollRegion::full(height),
            style: Style::NORMAL,
            active_rows: 0,
            replies: Vec::new(),
            directive: None,
            screen_buf: ScreenBuf::new(config.prompt, config.max_scroll_lines),
            events: Vec::new(),
            needs_updating: true,
            pending_reconnect: None,
            extractor: Box::new(TagStripper),
        }
    }

    /// Replace the HTML-to-text strategy used for unauthenticated payloads.
    pub fn set_text_extractor(&mut self, extractor: Box<dyn TextExtractor>) {
        self.extractor = extractor;
    }

    // ── Accessors ───────────────────────────────────────────────────

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    #[must_use]
    pub fn width(&self) -> u16 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u16 {
        self.height
    }

    #[must_use]
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Rows of the main screen holding session content.
    #[must_use]
    pub fn active_rows(&self) -> u16 {
        self.active_rows
    }

    #[must_use]
    pub fn is_alt_mode(&self) -> bool {
        self.alt_mode
    }

    /// The screen currently displayed.
    #[must_use]
    pub fn screen(&self) -> &Screen {
        if self.alt_mode { &self.alt } else { &self.main }
    }

    #[must_use]
    pub fn main_screen(&self) -> &Screen {
        &self.main
    }

    #[must_use]
    pub fn scrollback(&self) -> &Scrollback {
        self.screen_buf.scrollback()
    }

    #[must_use]
    pub fn prompt(&self) -> Option<&PromptFormat> {
        self.screen_buf.prompt()
    }

    /// Whether output arrived since the last [`Terminal::update`].
    #[must_use]
    pub fn needs_updating(&self) -> bool {
        self.needs_updating
    }

    /// Whether a directive payload is being collected.
    #[must_use]
    pub fn in_directive(&self) -> bool {
        self.directive.is_some()
    }

    // ── Input and output ────────────────────────────────────────────

    /// Interpret pty output. Partial escape sequences, UTF-8 sequences and
    /// directive payloads carry over to the next call.
    pub fn write(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.needs_updating = true;
        let mut rest = bytes;
        while !rest.is_empty() {
            if let Some(buffer) = self.directive.as_mut() {
                // A directive ends at the next escape, which is then parsed
                // as the closing sequence.
                match rest.iter().position(|&byte| byte == 0x1b) {
                    Some(pos) => {
                        buffer.extend(&rest[..pos]);
                        rest = &rest[pos..];
                        self.finish_directive();
                    }
                    None => {
                        buffer.extend(rest);
                        return;
                    }
                }
                continue;
            }

            let mut consumed = rest.len();
            for (index, &byte) in rest.iter().enumerate() {
                if let Some(action) = self.parser.advance(byte) {
                    self.apply_action(action);
                    if self.directive.is_some() {
                        consumed = index + 1;
                        break;
                    }
                }
            }
            rest = &rest[consumed..];
        }
    }

    /// Take the reply bytes queued by device queries, oldest first.
    pub fn read(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.replies)
    }

    /// Take the events produced since the last call, oldest first.
    pub fn drain_events(&mut self) -> Vec<TerminalEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Updates ─────────────────────────────────────────────────────

    /// Diff the live screen against the last update and queue a
    /// `row_update` event.
    pub fn update(&mut self) {
        self.needs_updating = false;
        if !self.alt_mode {
            self.scroll_screen(None);
        }

        let view = ScreenView {
            active_rows: self.active_rows,
            width: self.width,
            height: self.height,
            cursor: (self.cursor.row, self.cursor.col),
            main: &self.main,
            alt: self.alt_mode.then_some(&self.alt),
        };
        let diff = self.screen_buf.update(view);

        self.events.push(TerminalEvent::RowUpdate {
            response_id: self.pending_reconnect.take().unwrap_or_default(),
            update: RowUpdate {
                alt_mode: self.alt_mode,
                full_update: diff.full_update,
                active_rows: self.active_rows,
                width: self.width,
                height: self.height,
                cursor_x: self.cursor.col,
                cursor_y: self.cursor.row,
                prompt_offset: self.screen_buf.pre_offset(),
                rows: diff.rows,
                scrollback: diff.scrollback,
            },
        });
    }

    /// Resend the whole screen and all scrollback on the next update,
    /// tagged with `response_id`.
    pub fn reconnect(&mut self, response_id: impl Into<String>) {
        self.screen_buf.reconnect();
        self.pending_reconnect = Some(response_id.into());
        self.needs_updating = true;
    }

    // ── Screen management ───────────────────────────────────────────

    /// Change the screen size.
    ///
    /// Both screens are rebuilt blank. When the first row of the main screen
    /// holds a prompt it is kept, truncated to the new width.
    pub fn resize(&mut self, height: u16, width: u16) {
        let height = height.max(1);
        let width = width.max(1);
        self.needs_updating = true;
        if height == self.height && width == self.width {
            return;
        }

        self.scroll_screen(None);
        let keep = usize::from(width.min(self.width));
        let saved = if self.active_rows > 0 {
            let line = self.main.row_text(0);
            let meta = self.main.meta(0).cloned();
            (self.screen_buf.prompt_offset(&line, meta.as_ref()) > 0).then(|| {
                let cells = self.main.row(0).map(|row| row[..keep].to_vec());
                let typed = self.main.row(0).map_or(0, |row| cell::trim_blank(row).len());
                (cells.unwrap_or_default(), meta, typed)
            })
        } else {
            None
        };

        tracing::debug!(
            name = %self.name,
            width,
            height,
            keep_prompt = saved.is_some(),
            "terminal resized"
        );
        self.width = width;
        self.height = height;
        self.reset();

        if let Some((cells, meta, typed)) = saved {
            for (col, cell) in (0u16..).zip(cells) {
                self.main.set_cell(0, col, cell);
            }
            self.main.set_meta(0, meta);
            self.active_rows = 1;
            self.cursor.col = u16::try_from(typed)
                .unwrap_or(u16::MAX)
                .min(width - 1);
        }
    }

    /// Drop all scrollback and every active row but the cursor row.
    pub fn clear(&mut self) {
        self.screen_buf.clear_scrollback();
        if !self.alt_mode && self.active_rows > 0 {
            let row = self.cursor.row.min(self.active_rows - 1);
            self.main.copy_rows(row, 0, 1);
            self.main.erase_lines(1, self.height - 1);
            self.active_rows = 1;
            self.cursor.row = 0;
        }
        self.needs_updating = true;
    }

    /// Retract the newest scrollback entry, only if it has index `guard`
    /// when one is given.
    pub fn clear_last_entry(&mut self, guard: Option<u64>) -> bool {
        let cleared = self.screen_buf.clear_last_entry(guard);
        if cleared {
            self.screen_buf.force_full_update();
            self.needs_updating = true;
        }
        cleared
    }

    // ── Viewer requests ─────────────────────────────────────────────

    /// Compute the text a click on `text` or `file_url` should type into
    /// the command line. The caller writes the result to the pty.
    ///
    /// `fallback_cwd` supplies the shell's directory when the command line
    /// carries none.
    pub fn click_paste(
        &mut self,
        text: &str,
        file_url: &str,
        options: &PasteOptions,
        env: PasteEnv<'_>,
        fallback_cwd: impl FnOnce() -> Option<String>,
    ) -> Result<Option<String>, PasteError> {
        if self.active_rows == 0 {
            return Err(PasteError::NotAtCommandLine);
        }
        let row = self.active_rows - 1;
        let line = self.main.row_text(row);
        let row_meta = self.main.meta(row).cloned();
        let cwd = row_meta
            .as_ref()
            .map(|meta| meta.directory.clone())
            .filter(|dir| !dir.is_empty())
            .or_else(fallback_cwd)
            .unwrap_or_default();
        let meta = row_meta.or_else(|| (!cwd.is_empty()).then(|| RowMeta::prompt(cwd.clone())));
        let offset = self.screen_buf.prompt_offset(&line, meta.as_ref());

        if let Some(guard) = options.clear_last.filter(|&guard| guard > 0)
            && offset > 0
            && offset == line.trim_end().chars().count()
        {
            self.clear_last_entry(Some(guard));
        }

        let scrollback = self.screen_buf.scrollback();
        let normalize_by_default = !cwd.is_empty()
            && (!scrollback.cleared_last()
                || scrollback
                    .cleared_directory()
                    .is_none_or(|dir| dir == cwd));
        let cmdline = CommandLine {
            line: &line,
            cursor_col: (self.cursor.row == row).then_some(usize::from(self.cursor.col)),
            prompt_offset: offset,
            cwd: &cwd,
            normalize_by_default,
            local_host: env.local_host,
            search_dir: env.search_dir,
        };
        paste::compose(&cmdline, text, file_url, options)
    }

    /// Write `data` to `path` and queue a `save_status` event.
    pub fn save_file(&mut self, path: &str, data: &[u8]) {
        self.events.push(directive::save_file(path, data).into());
    }

    // ── Internals ───────────────────────────────────────────────────

    fn reset(&mut self) {
        self.main = Screen::new(self.width, self.height);
        self.alt = Screen::new(self.width, self.height);
        self.region = ScrollRegion::full(self.height);
        self.cursor = Cursor::default();
        self.saved_cursor = SavedCursor::default();
        self.style = Style::NORMAL;
        self.active_rows = 0;
        self.directive = None;
        self.needs_updating = true;
    }

    fn screen_mut(&mut self) -> &mut Screen {
        if self.alt_mode {
            &mut self.alt
        } else {
            &mut self.main
        }
    }

    fn reply(&mut self, bytes: &[u8]) {
        self.replies.extend_from_slice(bytes);
    }

    /// Count the cursor row as content on the main screen.
    fn touch_cursor_row(&mut self) {
        if !self.alt_mode {
            self.active_rows = self.active_rows.max(self.cursor.row + 1);
        }
    }

    fn is_prompt_row(&self, row: u16) -> bool {
        let line = self.main.row_text(row);
        self.screen_buf.prompt_offset(&line, self.main.meta(row)) > 0
    }

    /// Move the first `scroll_rows` active rows into scrollback, or every
    /// row above the last prompt row when `None`.
    fn scroll_screen(&mut self, scroll_rows: Option<u16>) {
        let scroll_rows = match scroll_rows {
            Some(rows) => rows.min(self.active_rows),
            None => (0..self.active_rows)
                .rev()
                .find(|&row| self.is_prompt_row(row))
                .unwrap_or(0),
        };
        if scroll_rows == 0 {
            return;
        }

        for row in 0..scroll_rows {
            let line = self.main.row_text(row);
            self.screen_buf.scroll_buf_up(line, self.main.meta(row));
        }
        if scroll_rows < self.active_rows {
            self.main
                .copy_rows(scroll_rows, 0, self.active_rows - scroll_rows);
        }
        self.active_rows -= scroll_rows;
        self.main.erase_lines(self.active_rows, self.height - 1);
        self.cursor.row = self.cursor.row.saturating_sub(scroll_rows);
        if self.active_rows == 0 {
            self.cursor.col = 0;
            self.cursor.pending_wrap = false;
        }
    }

    /// Line feed: scroll at the bottom of the region, capturing the row
    /// that leaves a full-height main screen region.
    fn cursor_down(&mut self) {
        let (top, bottom) = (self.region.top(), self.region.bottom());
        if self.cursor.row == bottom {
            if !self.alt_mode && top == 0 {
                let line = self.main.row_text(top);
                self.screen_buf.scroll_buf_up(line, self.main.meta(top));
            }
            self.screen_mut().scroll_up(top, bottom);
        } else if self.cursor.row + 1 < self.height {
            self.cursor.row += 1;
        }
        self.cursor.pending_wrap = false;
        self.touch_cursor_row();
    }

    fn print(&mut self, ch: char) {
        if self.cursor.pending_wrap {
            let continued = if self.alt_mode {
                None
            } else {
                self.main.meta(self.cursor.row).map(RowMeta::continued)
            };
            self.cursor_down();
            self.cursor.col = 0;
            if let Some(meta) = continued {
                self.main.set_meta(self.cursor.row, Some(meta));
            }
        }

        let (row, col, style) = (self.cursor.row, self.cursor.col, self.style);
        self.screen_mut().set_cell(row, col, Cell::new(ch, style));
        if col + 1 >= self.width {
            self.cursor.pending_wrap = true;
        } else {
            self.cursor.col = col + 1;
        }
        self.touch_cursor_row();
    }

    fn reverse_index(&mut self) {
        let (top, bottom) = (self.region.top(), self.region.bottom());
        if self.cursor.row == top {
            self.screen_mut().scroll_down(top, bottom);
        } else {
            self.cursor.row = self.cursor.row.saturating_sub(1);
        }
        self.cursor.pending_wrap = false;
        self.touch_cursor_row();
    }

    fn move_cursor_to(&mut self, row: u16, col: u16) {
        self.cursor.row = row.min(self.height - 1);
        self.cursor.col = col.min(self.width - 1);
        self.cursor.pending_wrap = false;
    }

    fn apply_action(&mut self, action: Action) {
        match action {
            Action::Print(ch) => self.print(ch),
            Action::Backspace => {
                self.cursor.col = self.cursor.col.saturating_sub(1);
                self.cursor.pending_wrap = false;
            }
            Action::Tab => {
                let stop = (self.cursor.col / 8 + 1).saturating_mul(8);
                self.cursor.col = stop.min(self.width - 1);
                self.cursor.pending_wrap = false;
            }
            Action::LineFeed | Action::Index => self.cursor_down(),
            Action::NextLine => {
                self.cursor_down();
                self.cursor.col = 0;
            }
            Action::CarriageReturn => self.cursor.carriage_return(),
            Action::ReverseIndex => self.reverse_index(),
            Action::SaveCursor => self.saved_cursor = SavedCursor::save(&self.cursor),
            Action::RestoreCursor => {
                self.saved_cursor
                    .restore(&mut self.cursor, self.height, self.width);
                self.touch_cursor_row();
            }
            Action::FullReset => {
                self.alt_mode = false;
                self.reset();
            }
            Action::DeviceAttributes => self.reply(REPLY_DEVICE_ATTRIBUTES),
            Action::SecondaryDeviceAttributes => self.reply(REPLY_SECONDARY_ATTRIBUTES),
            Action::StatusReport => self.reply(REPLY_STATUS_OK),
            Action::CursorPositionReport => {
                let report = format!("\x1b[{};{}R", self.cursor.row + 1, self.cursor.col + 1);
                self.reply(report.as_bytes());
            }
            Action::TerminalParameters => self.reply(REPLY_TERMINAL_PARAMETERS),
            Action::InsertBlanks(count) => {
                let (row, col) = (self.cursor.row, self.cursor.col);
                for _ in 0..count.min(self.width - col) {
                    self.screen_mut().insert_blank(row, col);
                }
            }
            Action::CursorUp(count) => {
                let floor = if self.cursor.row >= self.region.top() {
                    self.region.top()
                } else {
                    0
                };
                self.cursor.row = self.cursor.row.saturating_sub(count).max(floor);
                self.cursor.pending_wrap = false;
            }
            Action::CursorDown(count) => self.move_down(count),
            Action::CursorForward(count) => {
                self.cursor.col = self.cursor.col.saturating_add(count).min(self.width - 1);
                self.cursor.pending_wrap = false;
            }
            Action::CursorBackward(count) => {
                self.cursor.col = self.cursor.col.saturating_sub(count);
                self.cursor.pending_wrap = false;
            }
            Action::CursorNextLine(count) => {
                self.move_down(count);
                self.cursor.col = 0;
            }
            Action::CursorPrevLine(count) => {
                self.apply_action(Action::CursorUp(count));
                self.cursor.col = 0;
            }
            Action::CursorColumn(col) => {
                self.move_cursor_to(self.cursor.row, col.saturating_sub(1));
            }
            Action::CursorRow(row) => {
                self.move_cursor_to(row.saturating_sub(1), self.cursor.col);
                self.touch_cursor_row();
            }
            Action::CursorPosition { row, col } => {
                self.move_cursor_to(row.saturating_sub(1), col.saturating_sub(1));
                self.touch_cursor_row();
            }
            Action::EraseInDisplay(mode) => self.erase_in_display(mode),
            Action::EraseInLine(mode) => self.erase_in_line(mode),
            Action::InsertLines(count) => {
                let (row, bottom) = (self.cursor.row, self.region.bottom());
                if self.region.contains(row) {
                    for _ in 0..count.min(bottom - row + 1) {
                        self.screen_mut().scroll_down(row, bottom);
                    }
                }
            }
            Action::DeleteLines(count) => {
                let (row, bottom) = (self.cursor.row, self.region.bottom());
                if self.region.contains(row) {
                    for _ in 0..count.min(bottom - row + 1) {
                        self.screen_mut().scroll_up(row, bottom);
                    }
                }
            }
            Action::DeleteChars(count) => {
                let (row, col) = (self.cursor.row, self.cursor.col);
                self.screen_mut().delete_chars(row, col, count);
            }
            Action::EraseChars(count) => {
                let (row, col) = (self.cursor.row, self.cursor.col);
                self.screen_mut().erase_chars(row, col, count);
            }
            Action::SetScrollRegion { top, bottom } => {
                match ScrollRegion::from_params(top, bottom, self.height) {
                    Some(region) => self.region = region,
                    None => tracing::debug!(top, bottom, "ignoring invalid scroll region"),
                }
            }
            Action::SetMode(params) => self.set_mode(&params, true),
            Action::ResetMode(params) => self.set_mode(&params, false),
            Action::Sgr(params) => self.apply_sgr(&params),
        }
    }

    fn move_down(&mut self, count: u16) {
        let ceiling = if self.cursor.row <= self.region.bottom() {
            self.region.bottom()
        } else {
            self.height - 1
        };
        self.cursor.row = self.cursor.row.saturating_add(count).min(ceiling);
        self.cursor.pending_wrap = false;
        self.touch_cursor_row();
    }

    fn erase_in_display(&mut self, mode: u16) {
        let (row, col) = (self.cursor.row, self.cursor.col);
        let (last_row, last_col) = (self.height - 1, self.width - 1);
        let screen = self.screen_mut();
        match mode {
            0 if col == 0 => screen.erase_lines(row, last_row),
            0 => screen.erase_range(row, col, last_row, last_col),
            1 if col == last_col => screen.erase_lines(0, row),
            1 => screen.erase_range(0, 0, row, col),
            2 | 3 => screen.clear(),
            _ => tracing::debug!(mode, "ignoring erase-in-display mode"),
        }
    }

    fn erase_in_line(&mut self, mode: u16) {
        let (row, col) = (self.cursor.row, self.cursor.col);
        let last_col = self.width - 1;
        let screen = self.screen_mut();
        match mode {
            0 => screen.erase_range(row, col, row, last_col),
            1 => screen.erase_range(row, 0, row, col),
            2 => screen.erase_lines(row, row),
            _ => tracing::debug!(mode, "ignoring erase-in-line mode"),
        }
    }

    fn apply_sgr(&mut self, params: &[u64]) {
        if params.is_empty() {
            self.style = Style::NORMAL;
            return;
        }
        for &param in params {
            self.style = match param {
                0 | 27 | 39 | 49 => Style::NORMAL,
                1 => self.style.with_bold(),
                7 => Style::INVERSE,
                30..=37 => self.style.with_fg((param - 30) as u8),
                40..=47 => self.style.with_bg((param - 40) as u8),
                _ => self.style,
            };
        }
    }

    // ── Modes and directives ────────────────────────────────────────

    fn set_mode(&mut self, params: &[u64], enable: bool) {
        let Some(&mode) = params.first() else {
            return;
        };
        if ALTERNATE_SCREEN_MODES.contains(&mode) {
            self.set_alt_mode(enable);
        } else if let Some(code) = DirectiveCode::from_mode(mode) {
            // The closing sequence is consumed in `write`.
            if enable {
                self.open_directive(code, params.get(1).copied());
            }
        } else {
            tracing::trace!(mode, enable, "ignoring mode");
        }
    }

    fn set_alt_mode(&mut self, enable: bool) {
        self.style = Style::NORMAL;
        if enable {
            self.alt_mode = true;
            self.alt.clear();
        } else {
            self.alt_mode = false;
            self.cursor.row = self.active_rows.saturating_sub(1);
            self.cursor.col = 0;
            self.cursor.pending_wrap = false;
        }
    }

    fn open_directive(&mut self, code: DirectiveCode, presented: Option<u64>) {
        if self.alt_mode {
            tracing::debug!(name = %self.name, ?code, "directive ignored on alternate screen");
            return;
        }
        let validated =
            presented.is_some_and(|presented| cookie_matches(&presented.to_string(), &self.cookie));
        if code == DirectiveCode::Payload {
            self.scroll_screen(Some(self.active_rows));
        }
        self.directive = Some(DirectiveBuffer::new(
            code,
            validated,
            self.max_directive_bytes,
        ));
    }

    fn finish_directive(&mut self) {
        let Some(buffer) = self.directive.take() else {
            return;
        };
        match buffer.code() {
            DirectiveCode::Prompt => {
                let directory = String::from_utf8_lossy(buffer.data()).into_owned();
                if !directory.is_empty() {
                    self.expect_prompt(directory);
                }
            }
            DirectiveCode::Payload if buffer.overflowed() => {
                self.update();
                self.events.push(
                    directive::overflow_output(buffer.is_validated(), self.max_directive_bytes)
                        .into(),
                );
            }
            DirectiveCode::Payload => {
                if buffer.data().is_empty() {
                    return;
                }
                self.update();
                let payload = String::from_utf8_lossy(buffer.data());
                let events = directive::interpret_payload(
                    &payload,
                    buffer.is_validated(),
                    self.max_file_bytes,
                    self.extractor.as_ref(),
                );
                self.events.extend(events.into_iter().map(TerminalEvent::from));
            }
        }
    }

    /// Tag the cursor row as a prompt in `directory`, if it is the last
    /// active row.
    fn expect_prompt(&mut self, directory: String) {
        if self.active_rows == 0 || self.cursor.row + 1 == self.active_rows {
            self.main
                .set_meta(self.cursor.row, Some(RowMeta::prompt(directory)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DirectiveKind;

    const COOKIE: &str = "1234567890123456";

    fn terminal(width: u16, height: u16) -> Terminal {
        Terminal::new(
            "tty1",
            TerminalConfig::default()
                .with_size(width, height)
                .with_cookie(COOKIE),
        )
    }

    fn prompted(width: u16, height: u16) -> Terminal {
        Terminal::new(
            "tty1",
            TerminalConfig::default()
                .with_size(width, height)
                .with_cookie(COOKIE)
                .with_prompt(PromptFormat::new("", "", "$")),
        )
    }

    fn row(term: &Terminal, row: u16) -> String {
        term.screen().row_text(row).trim_end().to_string()
    }

    fn row_updates(events: &[TerminalEvent]) -> Vec<&RowUpdate> {
        events.iter().filter_map(TerminalEvent::as_row_update).collect()
    }

    #[test]
    fn hello_newline_scenario() {
        let mut term = terminal(80, 25);
        term.write(b"hello\r\n");
        assert_eq!(term.cursor().col, 0);
        assert_eq!(term.cursor().row, 1);
        assert_eq!(row(&term, 0), "hello");
        assert_eq!(
            term.main_screen().cell(0, 0).map(Cell::style),
            Some(Style::NORMAL)
        );
        assert_eq!(term.active_rows(), 2);

        term.update();
        let events = term.drain_events();
        let updates = row_updates(&events);
        assert_eq!(updates.len(), 1);
        let changed: Vec<u16> = updates[0].rows.iter().map(|r| r.row).collect();
        assert_eq!(changed, vec![0, 1]);
    }

    #[test]
    fn replies_are_fifo() {
        let mut term = terminal(8, 4);
        term.write(b"\x1b[5n\x1b[6n\x1b[c");
        assert_eq!(term.read(), b"\x1b[0n\x1b[1;1R\x1b[?6c".to_vec());
        assert!(term.read().is_empty());
    }

    #[test]
    fn chunked_write_matches_single_write() {
        let bytes = "ab\x1b[2;3HZ\x1b[5né".as_bytes();
        let mut single = terminal(6, 4);
        single.write(bytes);

        let mut chunked = terminal(6, 4);
        for chunk in bytes.chunks(1) {
            chunked.write(chunk);
        }
        assert_eq!(single.main_screen(), chunked.main_screen());
        assert_eq!(single.cursor(), chunked.cursor());
        assert_eq!(single.read(), chunked.read());
    }

    #[test]
    fn wrap_marks_continuation_rows() {
        let mut term = prompted(4, 4);
        term.write(b"$ ");
        term.write(b"\x1b[?1150;h/tmp\x1b[?1150;l");
        term.write(b"abcd");
        assert_eq!(row(&term, 0), "$ ab");
        assert_eq!(row(&term, 1), "cd");
        assert_eq!(term.main_screen().meta(0).map(|m| m.continuation), Some(0));
        assert_eq!(term.main_screen().meta(1).map(|m| m.continuation), Some(1));
    }

    #[test]
    fn prompt_directive_tags_last_active_row() {
        let mut term = prompted(20, 4);
        term.write(b"out\r\n$ ");
        term.write(b"\x1b[?1150;h/home/u\x1b[?1150;l");
        let meta = term.main_screen().meta(1).cloned();
        assert_eq!(meta, Some(RowMeta::prompt("/home/u")));
        assert!(term.main_screen().meta(0).is_none());
    }

    #[test]
    fn update_scrolls_rows_above_last_prompt() {
        let mut term = prompted(20, 6);
        term.write(b"$ ls\r\n");
        term.write(b"a.txt\r\n$ ");
        term.write(b"\x1b[?1150;h/tmp\x1b[?1150;l");
        term.update();

        assert_eq!(term.active_rows(), 1);
        assert_eq!(row(&term, 0), "$");
        let lines: Vec<&str> = term.scrollback().iter().map(|e| e.line.as_str()).collect();
        assert_eq!(lines, vec!["$ ls", "a.txt"]);
    }

    #[test]
    fn full_screen_scroll_captures_top_row() {
        let mut term = terminal(10, 2);
        term.write(b"one\r\ntwo\r\nthree");
        assert_eq!(row(&term, 0), "two");
        assert_eq!(row(&term, 1), "three");
        let lines: Vec<&str> = term.scrollback().iter().map(|e| e.line.as_str()).collect();
        assert_eq!(lines, vec!["one"]);
    }

    #[test]
    fn alternate_screen_leaves_main_untouched() {
        let mut term = terminal(10, 3);
        term.write(b"keep\r\n");
        term.write(b"\x1b[?1049h");
        assert!(term.is_alt_mode());
        term.write(b"x\r\ny\r\nz\r\nw\r\n");
        term.write(b"\x1b[?1049l");
        assert!(!term.is_alt_mode());
        assert_eq!(row(&term, 0), "keep");
        assert!(term.scrollback().is_empty());
        assert_eq!(term.cursor().row, 1);
    }

    #[test]
    fn alt_mode_update_reports_all_rows() {
        let mut term = terminal(10, 3);
        term.update();
        let _ = term.drain_events();
        term.write(b"\x1b[?1049hvi");
        term.update();
        let events = term.drain_events();
        let update = row_updates(&events)[0];
        assert!(update.alt_mode);
        assert!(update.full_update);
        assert_eq!(update.rows.len(), 3);
    }

    #[test]
    fn unvalidated_payload_is_plain_text() {
        let mut term = terminal(20, 4);
        term.write(b"\x1b[?1155;999h<div>x</div>\x1b[?1155;l");
        let events = term.drain_events();
        let directive = events
            .iter()
            .find_map(TerminalEvent::as_directive)
            .expect("directive event");
        assert_eq!(directive.kind, DirectiveKind::GraphtermOutput);
        assert_eq!(directive.params["validated"], serde_json::Value::Bool(false));
        assert_eq!(directive.decoded_body(), Some(b"x".to_vec()));
    }

    #[test]
    fn validated_payload_split_across_writes() {
        let mut term = terminal(20, 4);
        term.write(b"\x1b[?1155;1234567890123456h");
        assert!(term.in_directive());
        term.write(b"<b>bo");
        term.write(b"ld</b>");
        term.write(b"\x1b[?1155;l");
        assert!(!term.in_directive());

        let events = term.drain_events();
        let directive = events
            .iter()
            .find_map(TerminalEvent::as_directive)
            .expect("directive event");
        assert_eq!(directive.params["validated"], serde_json::Value::Bool(true));
        assert_eq!(directive.decoded_body(), Some(b"<b>bold</b>".to_vec()));
    }

    #[test]
    fn oversized_payload_reports_error() {
        let mut term = Terminal::new(
            "tty1",
            TerminalConfig::default()
                .with_cookie(COOKIE)
                .with_max_directive_bytes(8),
        );
        term.write(b"\x1b[?1155;1234567890123456h0123456789abcdef\x1b[?1155;l");
        let events = term.drain_events();
        let directive = events
            .iter()
            .find_map(TerminalEvent::as_directive)
            .expect("directive event");
        let body = String::from_utf8(directive.decoded_body().unwrap_or_default())
            .expect("utf-8 body");
        assert!(body.contains("exceeded 8 bytes"));
    }

    #[test]
    fn directive_ignored_on_alternate_screen() {
        let mut term = terminal(20, 4);
        term.write(b"\x1b[?1049h\x1b[?1155;1234567890123456hpayload\x1b[?1155;l");
        assert!(!term.in_directive());
        assert!(term.drain_events().is_empty());
        assert_eq!(row(&term, 0), "payload");
    }

    #[test]
    fn resize_keeps_prompt_row() {
        let mut term = prompted(20, 4);
        term.write(b"$ echo hello");
        term.write(b"\x1b[?1150;h/tmp\x1b[?1150;l");
        term.resize(3, 8);
        assert_eq!(term.width(), 8);
        assert_eq!(row(&term, 0), "$ echo h");
        assert_eq!(term.active_rows(), 1);
        assert_eq!(term.cursor().col, 7);
        assert_eq!(term.main_screen().meta(0), Some(&RowMeta::prompt("/tmp")));
    }

    #[test]
    fn resize_without_prompt_clears() {
        let mut term = terminal(20, 4);
        term.write(b"plain text");
        term.resize(4, 10);
        assert_eq!(row(&term, 0), "");
        assert_eq!(term.active_rows(), 0);
    }

    #[test]
    fn erase_and_edit_sequences() {
        let mut term = terminal(10, 3);
        term.write(b"abcdef\x1b[1;3H\x1b[K");
        assert_eq!(row(&term, 0), "ab");
        term.write(b"\x1b[2;1Hxyz\x1b[2;1H\x1b[P");
        assert_eq!(row(&term, 1), "yz");
        term.write(b"\x1b[2;1H\x1b[2@");
        assert_eq!(row(&term, 1), "  yz");
        term.write(b"\x1b[2J");
        assert_eq!(row(&term, 0), "");
        assert_eq!(row(&term, 1), "");
    }

    #[test]
    fn sgr_styles_cells() {
        let mut term = terminal(10, 2);
        term.write(b"\x1b[1;31mA\x1b[7mB\x1b[0mC");
        let screen = term.main_screen();
        let a = screen.cell(0, 0).map(Cell::style).expect("cell a");
        assert!(a.is_bold());
        assert_eq!(a.fg(), 1);
        assert_eq!(screen.cell(0, 1).map(Cell::style), Some(Style::INVERSE));
        assert_eq!(screen.cell(0, 2).map(Cell::style), Some(Style::NORMAL));
    }

    #[test]
    fn scroll_region_limits_line_feed() {
        let mut term = terminal(10, 4);
        term.write(b"\x1b[2;3r\x1b[2;1Ha\r\nb\r\nc");
        assert_eq!(row(&term, 1), "b");
        assert_eq!(row(&term, 2), "c");
        assert!(term.scrollback().is_empty());
    }

    #[test]
    fn tab_stops_clamp_to_last_column() {
        let mut term = terminal(12, 2);
        term.write(b"\t");
        assert_eq!(term.cursor().col, 8);
        term.write(b"\t");
        assert_eq!(term.cursor().col, 11);
    }

    #[test]
    fn reconnect_tags_next_update() {
        let mut term = terminal(10, 2);
        term.write(b"x");
        term.update();
        let _ = term.drain_events();
        term.reconnect("req-7");
        assert!(term.needs_updating());
        term.update();
        let events = term.drain_events();
        assert_eq!(events[0].response_id(), "req-7");
        let update = row_updates(&events)[0];
        assert!(update.full_update);
        assert_eq!(update.rows.len(), 1);
    }

    #[test]
    fn clear_keeps_cursor_row() {
        let mut term = terminal(10, 4);
        term.write(b"a\r\nb\r\nc");
        term.clear();
        assert_eq!(term.active_rows(), 1);
        assert_eq!(row(&term, 0), "c");
        assert_eq!(row(&term, 1), "");
        assert!(term.scrollback().is_empty());
    }

    #[test]
    fn click_paste_requires_active_rows() {
        let mut term = terminal(10, 4);
        let result = term.click_paste("x", "", &PasteOptions::default(), PasteEnv::default(), || {
            None
        });
        assert_eq!(result, Err(PasteError::NotAtCommandLine));
    }

    #[test]
    fn click_paste_appends_argument() {
        let mut term = prompted(40, 4);
        term.write(b"$ ls");
        term.write(b"\x1b[?1150;h/tmp\x1b[?1150;l");
        let pasted = term
            .click_paste(
                "",
                "file:///tmp/notes.txt",
                &PasteOptions::default(),
                PasteEnv::default(),
                || None,
            )
            .expect("paste");
        assert_eq!(pasted.as_deref(), Some(" notes.txt "));
    }

    #[test]
    fn save_file_reports_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.txt");
        let mut term = terminal(10, 2);
        term.save_file(path.to_str().expect("utf-8 path"), b"data");
        let events = term.drain_events();
        let directive = events[0].as_directive().expect("directive");
        assert_eq!(directive.kind, DirectiveKind::SaveStatus);
        assert_eq!(std::fs::read(&path).expect("read back"), b"data");
    }

    #[test]
    fn full_reset_leaves_alternate_screen() {
        let mut term = terminal(10, 3);
        term.write(b"main\x1b[?1049h\x1bc");
        assert!(!term.is_alt_mode());
        assert_eq!(row(&term, 0), "");
        assert_eq!(term.active_rows(), 0);
    }
}
