// Generic/fallback format parsing
//
// Handles agent-independent shapes that either CLI may emit: a bare
// `{"type":"text"}` object, a tool invocation object, a tool result object
// and an error object.

use crate::agents::format_parsers::{content_to_string, str_field};
use crate::agents::output_parser::NormalizedEvent;

/// Parse generic JSON shapes. Unknown shapes produce no events.
pub fn parse_generic_event(json: &serde_json::Value) -> Vec<NormalizedEvent> {
    let msg_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match msg_type {
        "text" => match json.get("text").and_then(|t| t.as_str()) {
            Some(text) if !text.is_empty() => vec![NormalizedEvent::text(text)],
            _ => Vec::new(),
        },
        "tool_use" | "tool_call" | "function_call" => {
            let Some(name) = str_field(json, &["name", "tool_name"]) else {
                return Vec::new();
            };
            let id = str_field(json, &["id", "tool_id", "call_id"]).unwrap_or("");
            let input = ["input", "args", "arguments", "parameters"]
                .iter()
                .find_map(|key| json.get(*key))
                .map(parse_stringified_input)
                .unwrap_or(serde_json::Value::Null);
            vec![NormalizedEvent::ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                input,
            }]
        }
        "tool_result" | "function_call_output" => {
            let content = ["content", "output", "result"]
                .iter()
                .find_map(|key| json.get(*key))
                .map(content_to_string)
                .unwrap_or_default();
            vec![NormalizedEvent::ToolResult {
                tool_id: str_field(json, &["tool_use_id", "tool_id", "call_id", "id"])
                    .map(String::from),
                content,
                is_error: json
                    .get("is_error")
                    .and_then(|e| e.as_bool())
                    .unwrap_or(false),
            }]
        }
        "error" => {
            let message = str_field(json, &["message", "error"])
                .unwrap_or("Agent reported an error");
            vec![NormalizedEvent::error(message)]
        }
        _ => Vec::new(),
    }
}

/// Function-call arguments are sometimes a JSON document encoded as a string
fn parse_stringified_input(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => {
            serde_json::from_str(s).unwrap_or_else(|_| value.clone())
        }
        other => other.clone(),
    }
}
