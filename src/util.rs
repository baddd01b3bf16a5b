//! Shared utility functions used across the codebase.

/// Find the largest valid UTF-8 char boundary at or before `pos`.
///
/// Polyfill for `str::floor_char_boundary` (nightly-only). Use when
/// truncating strings by byte position to avoid panicking on multi-byte
/// characters.
pub fn floor_char_boundary(s: &str, pos: usize) -> usize {
    if pos >= s.len() {
        return s.len();
    }
    let mut i = pos;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Truncate a string to at most `max_bytes`, respecting char boundaries.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    let cut = floor_char_boundary(s, max_bytes);
    &s[..cut]
}

/// Approximate a token count from character count (1 token ~= 4 chars).
///
/// Used where an exact tokenizer is unavailable; callers should treat this
/// as an upper-bound estimate, not an exact count.
pub fn approx_token_count(s: &str) -> usize {
    s.chars().count().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_char_boundary_at_valid_boundary() {
        assert_eq!(floor_char_boundary("hello", 3), 3);
    }

    #[test]
    fn floor_char_boundary_mid_multibyte_char() {
        let s = "hé";
        assert_eq!(floor_char_boundary(s, 2), 1);
    }

    #[test]
    fn floor_char_boundary_past_end() {
        assert_eq!(floor_char_boundary("hi", 100), 2);
    }

    #[test]
    fn floor_char_boundary_at_zero() {
        assert_eq!(floor_char_boundary("hello", 0), 0);
    }

    #[test]
    fn floor_char_boundary_empty_string() {
        assert_eq!(floor_char_boundary("", 5), 0);
    }

    #[test]
    fn truncate_str_respects_boundary() {
        let s = "hé says hi";
        let t = truncate_str(s, 2);
        assert_eq!(t, "h");
    }

    #[test]
    fn approx_token_count_rounds_up() {
        assert_eq!(approx_token_count("abcd"), 1);
        assert_eq!(approx_token_count("abcde"), 2);
        assert_eq!(approx_token_count(""), 0);
    }
}
