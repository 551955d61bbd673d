//! Outbound events produced by a terminal for its viewer.
//!
//! A [`TerminalEvent`] is either a screen diff ([`RowUpdate`]) or the result
//! of an out-of-band directive ([`DirectiveEvent`]). Both serialize with
//! `serde` so the transport layer can forward them as JSON unchanged.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::cell::RowText;
use crate::scrollback::ScrollbackEntry;

/// One changed row of the live screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangedRow {
    pub row: u16,
    pub prompt_offset: usize,
    pub text: RowText,
}

/// Screen diff delivered after an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowUpdate {
    pub alt_mode: bool,
    pub full_update: bool,
    pub active_rows: u16,
    pub width: u16,
    pub height: u16,
    pub cursor_x: u16,
    pub cursor_y: u16,
    /// Length of the prompt prefix, used by the viewer to strip it.
    pub prompt_offset: usize,
    pub rows: Vec<ChangedRow>,
    pub scrollback: Vec<ScrollbackEntry>,
}

/// Kind of a directive result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    CreateBlob,
    GraphtermOutput,
    SaveStatus,
    Alert,
    FrameMsg,
}

impl DirectiveKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DirectiveKind::CreateBlob => "create_blob",
            DirectiveKind::GraphtermOutput => "graphterm_output",
            DirectiveKind::SaveStatus => "save_status",
            DirectiveKind::Alert => "alert",
            DirectiveKind::FrameMsg => "frame_msg",
        }
    }
}

/// Result of a directive: a parameter map and an optional Base64 body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectiveEvent {
    pub kind: DirectiveKind,
    pub params: Map<String, Value>,
    pub body: Option<String>,
}

impl DirectiveEvent {
    #[must_use]
    pub fn new(kind: DirectiveKind, params: Map<String, Value>) -> Self {
        Self {
            kind,
            params,
            body: None,
        }
    }

    /// Attach `content` as the Base64 body. Empty content leaves no body.
    #[must_use]
    pub fn with_body(mut self, content: &[u8]) -> Self {
        self.body = (!content.is_empty()).then(|| STANDARD.encode(content));
        self
    }

    /// Attach an already Base64-encoded body.
    #[must_use]
    pub fn with_encoded_body(mut self, encoded: String) -> Self {
        self.body = Some(encoded);
        self
    }

    /// An alert carrying a single message.
    #[must_use]
    pub fn alert(message: impl Into<String>) -> Self {
        let mut params = Map::new();
        params.insert("message".to_string(), Value::String(message.into()));
        Self::new(DirectiveKind::Alert, params)
    }

    /// Decoded body bytes, if any.
    #[must_use]
    pub fn decoded_body(&self) -> Option<Vec<u8>> {
        self.body.as_ref().and_then(|body| STANDARD.decode(body).ok())
    }
}

/// Anything a terminal wants its viewer to know.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TerminalEvent {
    RowUpdate {
        /// Empty for live pushes, the request id when answering a reconnect.
        response_id: String,
        update: RowUpdate,
    },
    Directive(DirectiveEvent),
}

impl TerminalEvent {
    /// Wire name of the event kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            TerminalEvent::RowUpdate { .. } => "row_update",
            TerminalEvent::Directive(event) => event.kind.as_str(),
        }
    }

    #[must_use]
    pub fn response_id(&self) -> &str {
        match self {
            TerminalEvent::RowUpdate { response_id, .. } => response_id,
            TerminalEvent::Directive(_) => "",
        }
    }

    #[must_use]
    pub fn as_row_update(&self) -> Option<&RowUpdate> {
        match self {
            TerminalEvent::RowUpdate { update, .. } => Some(update),
            TerminalEvent::Directive(_) => None,
        }
    }

    #[must_use]
    pub fn as_directive(&self) -> Option<&DirectiveEvent> {
        match self {
            TerminalEvent::RowUpdate { .. } => None,
            TerminalEvent::Directive(event) => Some(event),
        }
    }
}

impl From<DirectiveEvent> for TerminalEvent {
    fn from(event: DirectiveEvent) -> Self {
        TerminalEvent::Directive(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_wire_names() {
        for kind in [
            DirectiveKind::CreateBlob,
            DirectiveKind::GraphtermOutput,
            DirectiveKind::SaveStatus,
            DirectiveKind::Alert,
            DirectiveKind::FrameMsg,
        ] {
            let json = serde_json::to_value(kind).expect("serialize kind");
            assert_eq!(json, Value::String(kind.as_str().to_string()));
        }
    }

    #[test]
    fn body_is_base64() {
        let event = DirectiveEvent::new(DirectiveKind::GraphtermOutput, Map::new())
            .with_body(b"<b>hi</b>");
        assert_eq!(event.body.as_deref(), Some("PGI+aGk8L2I+"));
        assert_eq!(event.decoded_body().as_deref(), Some(&b"<b>hi</b>"[..]));
        let empty = DirectiveEvent::new(DirectiveKind::GraphtermOutput, Map::new()).with_body(b"");
        assert!(empty.body.is_none());
    }

    #[test]
    fn alert_carries_message() {
        let event = TerminalEvent::from(DirectiveEvent::alert("nope"));
        assert_eq!(event.kind(), "alert");
        assert_eq!(event.response_id(), "");
        let directive = event.as_directive().expect("directive event");
        assert_eq!(directive.params["message"], "nope");
    }
}
