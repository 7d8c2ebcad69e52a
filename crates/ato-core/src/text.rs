//! Unicode-safe text utilities for message handling.

/// Return a slice of `text` containing at most `max_chars` Unicode scalar values.
///
/// Uses `char_indices().nth(max_chars)` — compatible with MSRV 1.85.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Default summary length for inbox messages: the first 80 characters of the body.
pub const SUMMARY_MAX_CHARS: usize = 80;
