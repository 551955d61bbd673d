//! Per-session cookies that authenticate directive payloads.

use rand::Rng;

const COOKIE_MIN: u64 = 1_000_000_000_000_000;
const COOKIE_MAX: u64 = 10_000_000_000_000_000;

/// A fresh 16-digit decimal cookie.
///
/// Cookies are decimal so they fit in a numeric CSI parameter, and have no
/// leading zero so the parsed parameter prints back to the same string.
#[must_use]
pub fn make_cookie() -> String {
    rand::rng().random_range(COOKIE_MIN..COOKIE_MAX).to_string()
}

/// Compare a presented cookie against the session cookie in constant time.
#[must_use]
pub fn cookie_matches(presented: &str, cookie: &str) -> bool {
    if cookie.is_empty() || presented.len() != cookie.len() {
        return false;
    }
    presented
        .bytes()
        .zip(cookie.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
