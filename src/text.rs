/// Truncate to at most `max_chars` characters, appending "..." when cut.
/// Cuts on a character boundary, so multi-byte output never panics.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
