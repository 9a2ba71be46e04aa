// Utility functions

use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;

/// Truncate a string to approximately max_bytes, ensuring we don't cut in the middle of a UTF-8 character
pub fn truncate_string(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    // Find the last valid char boundary at or before max_bytes
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Keep the last `max_bytes` of a string without splitting a UTF-8 character
pub fn tail_string(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut start = s.len() - max_bytes;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

static MODEL_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

fn model_name_regex() -> &'static Regex {
    MODEL_NAME_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:/-]{0,127}$").expect("model name regex is valid")
    })
}

/// Check that a model name is safe to place on an agent command line.
///
/// Rejects anything that could be read as a flag (leading `-`) or that carries
/// whitespace/shell metacharacters.
pub fn is_safe_model_name(model: &str) -> bool {
    model_name_regex().is_match(model)
}

/// Resolve the model to use for an invocation.
///
/// Returns the requested model when it passes validation, otherwise the
/// documented default for the agent.
pub fn resolve_model(requested: Option<&str>, default_model: &str) -> String {
    match requested.map(str::trim) {
        Some(model) if !model.is_empty() && is_safe_model_name(model) => model.to_string(),
        Some(model) if !model.is_empty() => {
            log::warn!(
                "[Models] Rejecting unsafe model name {:?}, using default {}",
                model,
                default_model
            );
            default_model.to_string()
        }
        _ => default_model.to_string(),
    }
}

/// Check that a session id only contains characters safe for a directory name
pub fn is_safe_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Compact UTC timestamp used in per-invocation file names
pub fn file_timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string_short() {
        assert_eq!(truncate_string("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_string_long() {
        assert_eq!(truncate_string("hello world", 5), "hello");
    }

    #[test]
    fn test_truncate_string_utf8() {
        let s = "hello\u{1F600}world"; // emoji is 4 bytes
        assert_eq!(truncate_string(s, 6), "hello");
    }

    #[test]
    fn test_tail_string_utf8() {
        let s = "\u{1F600}abc";
        assert_eq!(tail_string(s, 5), "abc");
        assert_eq!(tail_string(s, 7), s);
    }

    #[test]
    fn test_safe_model_names() {
        assert!(is_safe_model_name("gemini-2.5-pro"));
        assert!(is_safe_model_name("anthropic/claude-sonnet-4-5"));
        assert!(is_safe_model_name("sonnet"));
        assert!(!is_safe_model_name("--dangerously-skip-permissions"));
        assert!(!is_safe_model_name("model; rm -rf /"));
        assert!(!is_safe_model_name(""));
    }

    #[test]
    fn test_resolve_model_falls_back_to_default() {
        assert_eq!(resolve_model(None, "sonnet"), "sonnet");
        assert_eq!(resolve_model(Some("  "), "sonnet"), "sonnet");
        assert_eq!(resolve_model(Some("-x"), "sonnet"), "sonnet");
        assert_eq!(resolve_model(Some("opus"), "sonnet"), "opus");
    }

    #[test]
    fn test_safe_session_ids() {
        assert!(is_safe_session_id("6f1c2a1e-0000-4000-8000-000000000000"));
        assert!(is_safe_session_id("prd_chat_1"));
        assert!(!is_safe_session_id("../etc"));
        assert!(!is_safe_session_id(""));
    }
}
