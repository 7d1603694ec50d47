//! Chat message preparation.

use chrono::Utc;

/// Trims a chat message and checks it is worth relaying.
///
/// Returns `None` for messages that are blank after trimming or longer than
/// `max_len` characters.
pub fn prepare_message(raw: &str, max_len: usize) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().count() > max_len {
        return None;
    }
    Some(trimmed.to_string())
}

/// Server receive time in milliseconds since the Unix epoch.
pub fn timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}
