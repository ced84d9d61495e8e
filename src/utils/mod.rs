//! Utility functions and helpers used throughout homelink

pub mod logging;

/// Shorten a message for log lines and notices
pub fn truncate_message(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let mut out: String = input.chars().take(max_chars).collect();
    out.push('…');
    out
}
