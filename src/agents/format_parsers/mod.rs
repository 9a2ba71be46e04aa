// Agent-specific format parsers for processing CLI output
//
// Each agent CLI (Claude, Gemini) has its own output format.
// These parsers pick known fields out of a parsed JSON line, tolerating
// missing or mistyped ones, and build canonical `NormalizedEvent`s from it.

pub mod claude;
pub mod gemini;
pub mod generic;

use crate::models::AgentType;

/// Recover the final reply text carried by a terminal line, if any.
///
/// Claude reports it on its `result` line; Gemini's single-JSON output mode
/// carries it in `response`. Streaming Gemini output has no such line and
/// callers fall back to the accumulated text.
pub fn final_reply_text(agent_type: AgentType, json: &serde_json::Value) -> Option<String> {
    match agent_type {
        AgentType::Claude => claude::final_result_text(json),
        AgentType::Gemini => gemini::json_response_text(json),
    }
}

/// Read a string field trying several aliases in order
pub(crate) fn str_field<'a>(json: &'a serde_json::Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| json.get(*key).and_then(|v| v.as_str()))
}

/// Flatten tool result content that may be a string or an array of text blocks
pub(crate) fn content_to_string(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s.clone()),
                other => other.get("text").and_then(|t| t.as_str()).map(String::from),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_to_string_variants() {
        assert_eq!(content_to_string(&json!("plain")), "plain");
        assert_eq!(
            content_to_string(&json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}])),
            "a\nb"
        );
        assert_eq!(content_to_string(&json!(null)), "");
        assert_eq!(content_to_string(&json!({"k": 1})), r#"{"k":1}"#);
    }

    #[test]
    fn test_final_reply_text_per_agent() {
        let claude = json!({"type": "result", "subtype": "success", "result": "Done."});
        assert_eq!(
            final_reply_text(AgentType::Claude, &claude).as_deref(),
            Some("Done.")
        );

        let gemini = json!({"response": "All good", "stats": {}});
        assert_eq!(
            final_reply_text(AgentType::Gemini, &gemini).as_deref(),
            Some("All good")
        );
        assert!(final_reply_text(AgentType::Gemini, &claude).is_none());
    }
}
