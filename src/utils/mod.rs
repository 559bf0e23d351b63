pub mod config;
pub mod logging;

/// Truncate to at most `max_chars` characters without splitting a char.
pub fn truncate_at_char_boundary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
