// Gemini CLI output parsing
//
// Gemini CLI from @google/gemini-cli
// - Streaming: --output-format stream-json (init/message/tool_use/tool_result/error/result)
// - Single shot: --output-format json ({"response": ..., "stats": ..., "error": ...})

use crate::agents::format_parsers::{content_to_string, str_field};
use crate::agents::output_parser::NormalizedEvent;

/// Map one Gemini stream-json line to canonical events
pub fn parse_gemini_event(json: &serde_json::Value) -> Vec<NormalizedEvent> {
    let msg_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match msg_type {
        "message" => {
            // User messages echo the prompt back
            if json.get("role").and_then(|r| r.as_str()) != Some("assistant") {
                return Vec::new();
            }
            match json.get("content").map(content_to_string) {
                Some(text) if !text.is_empty() => vec![NormalizedEvent::text(text)],
                _ => Vec::new(),
            }
        }
        "tool_use" => {
            let name = str_field(json, &["tool_name", "name"]).unwrap_or("tool");
            let id = str_field(json, &["tool_id", "id"]).unwrap_or("");
            let input = json
                .get("parameters")
                .or_else(|| json.get("args"))
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            vec![NormalizedEvent::ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                input,
            }]
        }
        "tool_result" => {
            let is_error = json.get("status").and_then(|s| s.as_str()) == Some("error");
            let content = match json.get("output") {
                Some(output) => content_to_string(output),
                None => error_message(json).unwrap_or_default(),
            };
            vec![NormalizedEvent::ToolResult {
                tool_id: str_field(json, &["tool_id", "id"]).map(String::from),
                content,
                is_error,
            }]
        }
        "error" => {
            let message = str_field(json, &["message"])
                .map(String::from)
                .or_else(|| error_message(json))
                .unwrap_or_else(|| "Agent reported an error".to_string());
            vec![NormalizedEvent::error(message)]
        }
        "result" => {
            if json.get("status").and_then(|s| s.as_str()) == Some("error") {
                let message =
                    error_message(json).unwrap_or_else(|| "Agent run failed".to_string());
                vec![NormalizedEvent::error(message)]
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

fn error_message(json: &serde_json::Value) -> Option<String> {
    match json.get("error") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(obj) => obj
            .get("message")
            .and_then(|m| m.as_str())
            .map(String::from),
        None => None,
    }
}

/// Reply text from Gemini's single-JSON output mode
pub fn json_response_text(json: &serde_json::Value) -> Option<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(String::from)
}
