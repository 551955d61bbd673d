//! Out-of-band directive channel.
//!
//! Programs inside the terminal talk to the viewer by wrapping a payload in a
//! private mode set/reset pair: `ESC [ ? <code> ; <cookie> h ... ESC [ ? <code> l`.
//! Code [`PROMPT_DIRECTIVE`] carries the shell's working directory after each
//! prompt. Code [`PAYLOAD_DIRECTIVE`] carries a header block and a body.
//!
//! A payload is *validated* when the cookie parameter matches the session
//! cookie. Unvalidated payloads never touch the filesystem: they are reduced
//! to plain text and shown as a pagelet.

use std::fs;
use std::io::Read;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};

use crate::error::DirectiveError;
use crate::event::{DirectiveEvent, DirectiveKind};

/// Private mode code for the prompt working-directory report.
pub const PROMPT_DIRECTIVE: u64 = 1150;
/// Private mode code for a header + body payload.
pub const PAYLOAD_DIRECTIVE: u64 = 1155;

/// Default cap on a buffered payload.
pub const DEFAULT_MAX_DIRECTIVE_BYTES: usize = 10 * 1024 * 1024;
/// Default cap on a file opened for editing.
pub const DEFAULT_MAX_FILE_BYTES: usize = 1024 * 1024;

/// Header keys understood in a payload header block.
pub const RESPONSE_HEADER: &str = "x_term_response";
pub const PARAMETERS_HEADER: &str = "x_term_parameters";

const FILE_TYPES: &[(&str, &str)] = &[
    ("css", "css"),
    ("htm", "html"),
    ("html", "html"),
    ("js", "javascript"),
    ("py", "python"),
    ("xml", "xml"),
];

/// Which reserved code opened the directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveCode {
    Prompt,
    Payload,
}

impl DirectiveCode {
    #[must_use]
    pub fn from_mode(mode: u64) -> Option<Self> {
        match mode {
            PROMPT_DIRECTIVE => Some(Self::Prompt),
            PAYLOAD_DIRECTIVE => Some(Self::Payload),
            _ => None,
        }
    }
}

/// Bytes collected for an open directive.
#[derive(Debug, Clone)]
pub struct DirectiveBuffer {
    code: DirectiveCode,
    validated: bool,
    data: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl DirectiveBuffer {
    #[must_use]
    pub fn new(code: DirectiveCode, validated: bool, limit: usize) -> Self {
        Self {
            code,
            validated,
            data: Vec::new(),
            limit,
            overflowed: false,
        }
    }

    #[must_use]
    pub fn code(&self) -> DirectiveCode {
        self.code
    }

    #[must_use]
    pub fn is_validated(&self) -> bool {
        self.validated
    }

    #[must_use]
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Append bytes; once the cap is exceeded the rest is discarded.
    pub fn extend(&mut self, bytes: &[u8]) {
        if self.overflowed {
            return;
        }
        if self.data.len() + bytes.len() > self.limit {
            tracing::warn!(limit = self.limit, "directive payload exceeded size cap");
            self.overflowed = true;
            self.data.clear();
            return;
        }
        self.data.extend_from_slice(bytes);
    }
}

// ── Headers ─────────────────────────────────────────────────────────

/// Parsed header block of a payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Headers {
    pub content_type: String,
    pub response: String,
    pub parameters: Map<String, Value>,
    /// Every other header key, as given.
    pub extra: Map<String, Value>,
}

impl Headers {
    fn pagelet(content_type: &str) -> Self {
        Self {
            content_type: content_type.to_string(),
            response: "pagelet".to_string(),
            ..Self::default()
        }
    }

    fn error_message() -> Self {
        Self {
            content_type: "text/plain".to_string(),
            response: "error_message".to_string(),
            ..Self::default()
        }
    }

    fn from_map(mut map: Map<String, Value>) -> Self {
        let mut take_string = |key: &str| match map.remove(key) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let content_type = take_string("content_type");
        let response = take_string(RESPONSE_HEADER);
        let parameters = match map.remove(PARAMETERS_HEADER) {
            Some(Value::Object(params)) => params,
            _ => Map::new(),
        };
        Self {
            content_type,
            response,
            parameters,
            extra: map,
        }
    }

    fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    fn to_json(&self, content_length: usize) -> Value {
        let mut map = self.extra.clone();
        map.insert("content_type".into(), json!(self.content_type));
        map.insert(RESPONSE_HEADER.into(), json!(self.response));
        map.insert(PARAMETERS_HEADER.into(), Value::Object(self.parameters.clone()));
        map.insert("content_length".into(), json!(content_length));
        Value::Object(map)
    }
}

/// Split a payload into headers and body.
///
/// A payload starting with `<` is raw HTML. Otherwise the header block runs
/// to the first blank line (`\r\n\r\n`, `\n\n` or `\r\r`) and is either a JSON
/// object or `Key: value` lines. A header block that fails to parse yields a
/// plain-text body describing the error.
#[must_use]
pub fn parse_headers(payload: &str) -> (Headers, String) {
    if payload.starts_with('<') {
        return (Headers::pagelet("text/html"), payload.to_string());
    }

    let (head, body) = ["\r\n\r\n", "\n\n", "\r\r"]
        .iter()
        .filter_map(|sep| payload.find(sep).map(|idx| (idx, sep.len())))
        .min_by_key(|&(idx, _)| idx)
        .map_or((payload, ""), |(idx, len)| (&payload[..idx], &payload[idx + len..]));

    let head = head.trim();
    if head.starts_with('{') {
        return match serde_json::from_str::<Map<String, Value>>(head) {
            Ok(map) => (Headers::from_map(map), body.to_string()),
            Err(err) => (
                Headers::error_message(),
                format!("Error in parsing JSON headers: {err}\n{head}"),
            ),
        };
    }

    let mut map = Map::new();
    for line in head.lines() {
        let Some((key, value)) = line.split_once(':') else {
            return (
                Headers::error_message(),
                format!("Error in parsing headers: no colon in {line:?}"),
            );
        };
        let key = key.trim().to_ascii_lowercase().replace('-', "_");
        let value = value.trim();
        let value = if key == PARAMETERS_HEADER {
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
        } else {
            Value::String(value.to_string())
        };
        map.insert(key, value);
    }
    (Headers::from_map(map), body.to_string())
}

// ── Text extraction ─────────────────────────────────────────────────

/// Reduces untrusted HTML to plain text for display.
pub trait TextExtractor: Send + Sync + std::fmt::Debug {
    /// Plain text of `html`, or `None` to show the payload unmodified.
    fn extract(&self, html: &str) -> Option<String>;
}

/// Drops tags and decodes the handful of entities shells commonly emit.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagStripper;

impl TextExtractor for TagStripper {
    fn extract(&self, html: &str) -> Option<String> {
        let mut text = String::with_capacity(html.len());
        let mut in_tag = false;
        for ch in html.chars() {
            match (in_tag, ch) {
                (false, '<') => in_tag = true,
                (true, '>') => in_tag = false,
                (false, _) => text.push(ch),
                (true, _) => {}
            }
        }
        if in_tag {
            return None;
        }
        Some(
            text.replace("&lt;", "<")
                .replace("&gt;", ">")
                .replace("&quot;", "\"")
                .replace("&#39;", "'")
                .replace("&nbsp;", " ")
                .replace("&amp;", "&"),
        )
    }
}

// ── Interpretation ──────────────────────────────────────────────────

/// Turn a completed payload into viewer events.
pub fn interpret_payload(
    payload: &str,
    validated: bool,
    max_file_bytes: usize,
    extractor: &dyn TextExtractor,
) -> Vec<DirectiveEvent> {
    let (headers, content) = parse_headers(payload.trim_start());

    if !validated {
        if !headers.response.is_empty() && headers.response != "pagelet" {
            tracing::info!(
                response = %headers.response,
                "unvalidated directive shown as plain text"
            );
        }
        let text = extractor.extract(&content).unwrap_or(content);
        return vec![output(false, &Headers::pagelet("text/plain"), text.as_bytes())];
    }

    match headers.response.as_str() {
        "create_blob" => vec![create_blob(&headers, &content)],
        "edit_file" => vec![edit_file(headers, max_file_bytes)],
        "save_file" => match headers.parameter("filepath") {
            Some(path) => vec![save_file(path, content.as_bytes())],
            None => vec![DirectiveEvent::alert("save_file requires a filepath")],
        },
        "frame_msg" => vec![
            DirectiveEvent::new(DirectiveKind::FrameMsg, headers.parameters)
                .with_body(content.as_bytes()),
        ],
        _ => vec![output(true, &headers, content.as_bytes())],
    }
}

/// Report for a viewer-visible payload.
#[must_use]
pub fn output(validated: bool, headers: &Headers, content: &[u8]) -> DirectiveEvent {
    let mut params = Map::new();
    params.insert("validated".into(), Value::Bool(validated));
    params.insert("headers".into(), headers.to_json(content.len()));
    DirectiveEvent::new(DirectiveKind::GraphtermOutput, params).with_body(content)
}

/// Error output for a payload that exceeded the size cap.
#[must_use]
pub fn overflow_output(validated: bool, limit: usize) -> DirectiveEvent {
    let message = DirectiveError::TooLarge { limit }.to_string();
    output(validated, &Headers::error_message(), message.as_bytes())
}

fn create_blob(headers: &Headers, content: &str) -> DirectiveEvent {
    let Some(blob_id) = headers.parameter("blob_id") else {
        return DirectiveEvent::alert("create_blob requires a blob_id");
    };
    let encoded: String = content.split_whitespace().collect();
    let Ok(decoded) = STANDARD.decode(&encoded) else {
        return DirectiveEvent::alert(format!("create_blob {blob_id}: body is not base64"));
    };
    let mut params = headers.parameters.clone();
    params.insert("blob_id".into(), json!(blob_id));
    params.insert("content_type".into(), json!(headers.content_type));
    params.insert("content_length".into(), json!(decoded.len()));
    DirectiveEvent::new(DirectiveKind::CreateBlob, params).with_encoded_body(encoded)
}

fn edit_file(mut headers: Headers, max_file_bytes: usize) -> DirectiveEvent {
    let Some(path) = headers.parameter("filepath").map(str::to_string) else {
        return DirectiveEvent::alert("edit_file requires a filepath");
    };
    match read_capped(Path::new(&path), max_file_bytes) {
        Ok(content) => {
            if let Some(file_type) = file_type(&path) {
                headers.parameters.insert("filetype".into(), json!(file_type));
            }
            output(true, &headers, &content)
        }
        Err(err) => {
            tracing::debug!(%path, error = %err, "edit_file failed");
            let message = format!("ERROR in opening file '{path}': {err}");
            output(true, &Headers::error_message(), message.as_bytes())
        }
    }
}

/// Editor file type for `path`, from its extension.
#[must_use]
pub fn file_type(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    FILE_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|&(_, file_type)| file_type)
}

fn read_capped(path: &Path, limit: usize) -> Result<Vec<u8>, DirectiveError> {
    let file = fs::File::open(path).map_err(|source| DirectiveError::io(path, source))?;
    let mut content = Vec::new();
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    file.take(cap)
        .read_to_end(&mut content)
        .map_err(|source| DirectiveError::io(path, source))?;
    if content.len() > limit {
        return Err(DirectiveError::TooLarge { limit });
    }
    Ok(content)
}

/// Write `content` to `path` and report the outcome as `save_status`.
///
/// The status string is empty on success and describes the error otherwise.
pub fn save_file(path: &str, content: &[u8]) -> DirectiveEvent {
    let status = match fs::write(path, content) {
        Ok(()) => String::new(),
        Err(source) => {
            let err = DirectiveError::io(Path::new(path), source);
            tracing::warn!(error = %err, "save_file failed");
            err.to_string()
        }
    };
    let mut params = Map::new();
    params.insert("filepath".into(), json!(path));
    params.insert("status".into(), json!(status));
    DirectiveEvent::new(DirectiveKind::SaveStatus, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Refusing;

    impl TextExtractor for Refusing {
        fn extract(&self, _html: &str) -> Option<String> {
            None
        }
    }

    fn headers_of(event: &DirectiveEvent) -> &Map<String, Value> {
        event.params["headers"].as_object().expect("headers object")
    }

    #[test]
    fn raw_html_is_a_pagelet() {
        let (headers, body) = parse_headers("<b>hi</b>");
        assert_eq!(headers.response, "pagelet");
        assert_eq!(headers.content_type, "text/html");
        assert_eq!(body, "<b>hi</b>");
    }

    #[test]
    fn json_headers_with_each_separator() {
        for sep in ["\r\n\r\n", "\n\n", "\r\r"] {
            let payload = format!(
                r#"{{"content_type": "text/html", "x_term_response": "pagelet", "x_term_parameters": {{"scroll": "top"}}}}{sep}<p>x</p>"#
            );
            let (headers, body) = parse_headers(&payload);
            assert_eq!(headers.response, "pagelet");
            assert_eq!(headers.parameter("scroll"), Some("top"));
            assert_eq!(body, "<p>x</p>");
        }
    }

    #[test]
    fn mime_style_headers() {
        let (headers, body) = parse_headers(
            "Content-Type: text/plain\nX-Term-Response: frame_msg\nX-Term-Parameters: {\"a\": 1}\n\nbody",
        );
        assert_eq!(headers.content_type, "text/plain");
        assert_eq!(headers.response, "frame_msg");
        assert_eq!(headers.parameters["a"], 1);
        assert_eq!(body, "body");
    }

    #[test]
    fn malformed_json_becomes_error_text() {
        let (headers, body) = parse_headers("{not json}\n\nbody");
        assert_eq!(headers.response, "error_message");
        assert!(body.starts_with("Error in parsing JSON headers"));
    }

    #[test]
    fn tag_stripper_extracts_text() {
        let text = TagStripper.extract("<p>a &amp; <b>b</b> &lt;c&gt;</p>");
        assert_eq!(text.as_deref(), Some("a & b <c>"));
        assert_eq!(TagStripper.extract("<p unterminated"), None);
    }

    #[test]
    fn unvalidated_payload_is_plain_text() {
        let payload = r#"{"x_term_response": "save_file", "x_term_parameters": {"filepath": "/tmp/x"}}

<i>evil</i>"#;
        let events = interpret_payload(payload, false, 1024, &TagStripper);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, DirectiveKind::GraphtermOutput);
        assert_eq!(event.params["validated"], false);
        assert_eq!(headers_of(event)["x_term_response"], "pagelet");
        assert_eq!(headers_of(event)["content_type"], "text/plain");
        assert_eq!(event.decoded_body().as_deref(), Some(&b"evil"[..]));
    }

    #[test]
    fn unvalidated_payload_falls_back_to_raw() {
        let events = interpret_payload("<b>x</b>", false, 1024, &Refusing);
        assert_eq!(events[0].decoded_body().as_deref(), Some(&b"<b>x</b>"[..]));
    }

    #[test]
    fn validated_pagelet_keeps_headers() {
        let events = interpret_payload("<b>x</b>", true, 1024, &TagStripper);
        let event = &events[0];
        assert_eq!(event.params["validated"], true);
        assert_eq!(headers_of(event)["content_type"], "text/html");
        assert_eq!(headers_of(event)["content_length"], 8);
    }

    #[test]
    fn create_blob_requires_id_and_base64() {
        let ok = interpret_payload(
            "{\"x_term_response\": \"create_blob\", \"x_term_parameters\": {\"blob_id\": \"b1\"}, \"content_type\": \"image/png\"}\n\naGVs\nbG8=",
            true,
            1024,
            &TagStripper,
        );
        assert_eq!(ok[0].kind, DirectiveKind::CreateBlob);
        assert_eq!(ok[0].params["blob_id"], "b1");
        assert_eq!(ok[0].params["content_length"], 5);
        assert_eq!(ok[0].decoded_body().as_deref(), Some(&b"hello"[..]));

        let missing = interpret_payload(
            "{\"x_term_response\": \"create_blob\"}\n\naGVsbG8=",
            true,
            1024,
            &TagStripper,
        );
        assert_eq!(missing[0].kind, DirectiveKind::Alert);
    }

    #[test]
    fn edit_and_save_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("page.html");
        let path_str = path.to_str().expect("utf-8 path");

        let saved = save_file(path_str, b"<p>draft</p>");
        assert_eq!(saved.kind, DirectiveKind::SaveStatus);
        assert_eq!(saved.params["status"], "");

        let payload = format!(
            "{{\"x_term_response\": \"edit_file\", \"x_term_parameters\": {{\"filepath\": \"{path_str}\"}}}}\n\n"
        );
        let events = interpret_payload(&payload, true, 1024, &TagStripper);
        let params = &headers_of(&events[0])["x_term_parameters"];
        assert_eq!(params["filetype"], "html");
        assert_eq!(events[0].decoded_body().as_deref(), Some(&b"<p>draft</p>"[..]));

        let capped = interpret_payload(&payload, true, 4, &TagStripper);
        assert_eq!(headers_of(&capped[0])["x_term_response"], "error_message");
    }

    #[test]
    fn save_file_reports_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("no/such/dir/file");
        let event = save_file(missing.to_str().expect("utf-8 path"), b"x");
        assert_ne!(event.params["status"], "");
    }

    #[test]
    fn buffer_overflow_discards() {
        let mut buffer = DirectiveBuffer::new(DirectiveCode::Payload, true, 4);
        buffer.extend(b"abc");
        assert!(!buffer.overflowed());
        buffer.extend(b"de");
        assert!(buffer.overflowed());
        assert!(buffer.data().is_empty());
        buffer.extend(b"f");
        assert!(buffer.data().is_empty());
    }

    #[test]
    fn file_types_by_extension() {
        assert_eq!(file_type("/a/b.PY"), Some("python"));
        assert_eq!(file_type("x.htm"), Some("html"));
        assert_eq!(file_type("README"), None);
    }
}
