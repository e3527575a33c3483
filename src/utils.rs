//! Utility functions for text handling

/// Ellipsis appended to truncated texts
pub const ELLIPSIS: &str = "…";

/// Truncates a string to a maximum number of characters, respecting Unicode boundaries.
#[must_use]
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Fits `s` into `max_bytes` bytes of UTF-8, replacing the tail with `…` on overflow.
///
/// Telegram limits are expressed in bytes for callback answers and button
/// payloads, so this never splits a multi-byte character.
#[must_use]
pub fn truncate_bytes(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let budget = max_bytes.saturating_sub(ELLIPSIS.len());
    let mut cut = budget.min(s.len());
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{ELLIPSIS}", &s[..cut])
}
