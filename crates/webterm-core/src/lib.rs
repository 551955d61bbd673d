#![forbid(unsafe_code)]

//! Terminal core logic for browser-hosted shell sessions.
//!
//! A [`Terminal`] interprets pty output into a main and an alternate
//! [`Screen`], keeps command history as scrollback entry groups, and emits
//! [`TerminalEvent`]s: row diffs for the viewer and the results of the
//! cookie-authenticated directive channel.

pub mod cell;
pub mod cookie;
pub mod cursor;
pub mod directive;
pub mod error;
pub mod event;
pub mod markup;
pub mod parser;
pub mod paste;
pub mod screen;
pub mod screen_buf;
pub mod scrollback;
pub mod terminal;
pub mod utf8;

pub use cell::{Cell, RowText, Span, Style, StyleTags};
pub use cookie::{cookie_matches, make_cookie};
pub use cursor::{Cursor, SavedCursor, ScrollRegion};
pub use directive::{
    DirectiveBuffer, DirectiveCode, PAYLOAD_DIRECTIVE, PROMPT_DIRECTIVE, TagStripper,
    TextExtractor,
};
pub use error::{DirectiveError, PasteError};
pub use event::{ChangedRow, DirectiveEvent, DirectiveKind, RowUpdate, TerminalEvent};
pub use markup::PromptFormat;
pub use parser::{Action, Parser};
pub use paste::{FileUrl, PasteOptions};
pub use screen::{RowMeta, Screen};
pub use screen_buf::{ScreenBuf, ScreenDiff, ScreenView};
pub use scrollback::{DEFAULT_SCROLLBACK_LINES, Scrollback, ScrollbackEntry};
pub use terminal::{PasteEnv, Terminal, TerminalConfig};
pub use utf8::Utf8Decoder;
