//! Byte-at-a-time UTF-8 decoding that survives read boundaries.
//!
//! Pty reads can split a multi-byte character across two `write` calls. The
//! decoder keeps the incomplete lead bytes until the sequence completes. Bytes
//! that can never form a valid character are dropped rather than replaced.

/// Maximum number of bytes in a UTF-8 sequence.
const MAX_SEQUENCE: usize = 4;

/// Incremental UTF-8 decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Utf8Decoder {
    partial: [u8; MAX_SEQUENCE],
    partial_len: usize,
    expected: usize,
}

impl Utf8Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a multi-byte sequence is in progress.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.expected != 0
    }

    /// Forget any incomplete sequence.
    pub fn reset(&mut self) {
        self.partial_len = 0;
        self.expected = 0;
    }

    /// Feed one byte, returning a character once a sequence completes.
    ///
    /// A byte that cannot continue the pending sequence discards it and is
    /// then decoded on its own.
    pub fn push(&mut self, byte: u8) -> Option<char> {
        if self.expected == 0 {
            return self.start(byte);
        }
        if byte & 0xC0 != 0x80 {
            tracing::trace!(byte, "dropping interrupted utf-8 sequence");
            self.reset();
            return self.start(byte);
        }
        self.partial[self.partial_len] = byte;
        self.partial_len += 1;
        if self.partial_len < self.expected {
            return None;
        }
        let decoded = std::str::from_utf8(&self.partial[..self.partial_len])
            .ok()
            .and_then(|s| s.chars().next());
        if decoded.is_none() {
            tracing::trace!("dropping invalid utf-8 sequence");
        }
        self.reset();
        decoded
    }

    fn start(&mut self, byte: u8) -> Option<char> {
        let expected = match byte {
            0x00..=0x7F => return Some(char::from(byte)),
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => {
                tracing::trace!(byte, "dropping invalid utf-8 lead byte");
                return None;
            }
        };
        self.partial[0] = byte;
        self.partial_len = 1;
        self.expected = expected;
        None
    }
}
