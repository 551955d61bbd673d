//! Scrollback ring of entry-grouped lines.
//!
//! Every line that scrolls off the main screen lands here. A line that starts
//! at a shell prompt opens a new *entry*; output lines that follow join the
//! entry of the prompt above them. Entries are the unit of eviction and of
//! "clear last command", so a command line and its output are never split.

use std::collections::VecDeque;

use serde::Serialize;

/// Default scrollback capacity in lines.
pub const DEFAULT_SCROLLBACK_LINES: usize = 500;

/// One line of scrollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrollbackEntry {
    /// Command group this line belongs to.
    pub entry_index: u64,
    /// Column where the command text starts, or zero for output lines.
    pub prompt_offset: usize,
    /// Working directory at the prompt (empty for output lines).
    pub directory: String,
    /// HTML markup of the command line, only for prompt lines.
    pub markup: Option<String>,
    /// Display text of the line.
    pub line: String,
}

/// Bounded scrollback with whole-entry eviction and report tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scrollback {
    capacity: usize,
    lines: VecDeque<ScrollbackEntry>,
    entry_index: u64,
    /// Lines ever appended, minus lines retracted by `clear_last_entry`.
    total: u64,
    /// Value of `total` when new lines were last reported.
    reported: u64,
    cleared_directory: Option<String>,
    cleared_last: bool,
}

impl Scrollback {
    /// Create a new scrollback with a line capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: VecDeque::new(),
            entry_index: 0,
            total: 0,
            reported: 0,
            cleared_directory: None,
            cleared_last: false,
        }
    }

    /// Capacity in lines.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of stored lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the scrollback is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Index of the most recent entry.
    #[must_use]
    pub fn entry_index(&self) -> u64 {
        self.entry_index
    }

    /// Whether the previous entry was retracted and nothing has replaced it.
    #[must_use]
    pub fn cleared_last(&self) -> bool {
        self.cleared_last
    }

    /// Directory of the first retracted entry since the last fresh command.
    #[must_use]
    pub fn cleared_directory(&self) -> Option<&str> {
        self.cleared_directory.as_deref()
    }

    /// Iterate over stored lines (oldest to newest).
    pub fn iter(&self) -> impl Iterator<Item = &ScrollbackEntry> {
        self.lines.iter()
    }

    /// Start a new entry and return its index.
    pub fn begin_entry(&mut self) -> u64 {
        if !self.cleared_last {
            self.cleared_directory = None;
        }
        self.cleared_last = false;
        self.entry_index += 1;
        self.entry_index
    }

    /// Append a line, evicting whole entries from the front when full.
    pub fn push(&mut self, entry: ScrollbackEntry) {
        if self.capacity == 0 {
            return;
        }
        self.lines.push_back(entry);
        self.total += 1;
        while self.lines.len() > self.capacity {
            let Some(evicted) = self.lines.pop_front() else {
                break;
            };
            while self
                .lines
                .front()
                .is_some_and(|next| next.entry_index == evicted.entry_index)
            {
                self.lines.pop_front();
            }
        }
    }

    /// Lines appended since the last call, oldest first.
    pub fn take_unreported(&mut self) -> Vec<ScrollbackEntry> {
        let fresh = usize::try_from(self.total.saturating_sub(self.reported))
            .unwrap_or(usize::MAX)
            .min(self.lines.len());
        self.reported = self.total;
        self.lines.iter().skip(self.lines.len() - fresh).cloned().collect()
    }

    /// Arrange for the next report to resend everything retained.
    pub fn rewind(&mut self) {
        self.reported = self.total.saturating_sub(self.lines.len() as u64);
    }

    /// Retract the most recent entry.
    ///
    /// Nothing happens unless the newest line belongs to the newest entry
    /// and, when `guard` is given, that entry has index `guard`. Returns
    /// whether an entry was removed.
    pub fn clear_last_entry(&mut self, guard: Option<u64>) -> bool {
        if self.entry_index == 0 {
            return false;
        }
        let Some(last) = self.lines.back() else {
            return false;
        };
        if last.entry_index != self.entry_index {
            return false;
        }
        if guard.is_some_and(|guard| guard != self.entry_index) {
            return false;
        }

        let index = self.entry_index;
        let keep = self
            .lines
            .iter()
            .rposition(|line| line.entry_index != index)
            .map_or(0, |pos| pos + 1);
        let removed = self.lines.len() - keep;
        if self.cleared_directory.is_none() {
            self.cleared_directory = self.lines.get(keep).map(|line| line.directory.clone());
        }
        self.lines.truncate(keep);
        self.total = self.total.saturating_sub(removed as u64);
        self.reported = self.reported.min(self.total);
        self.entry_index -= 1;
        self.cleared_last = true;
        true
    }

    /// Drop all lines and restart entry numbering.
    pub fn clear(&mut self) {
        *self = Self::new(self.capacity);
    }
}

impl Default for Scrollback {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLLBACK_LINES)
    }
}
