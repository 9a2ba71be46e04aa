// Claude Code output parsing
//
// Parses the stream-json format output from Claude Code CLI
// (`claude -p --output-format stream-json --verbose`).

use crate::agents::format_parsers::{content_to_string, str_field};
use crate::agents::output_parser::NormalizedEvent;

/// Map one Claude stream-json line to canonical events
pub fn parse_claude_event(json: &serde_json::Value) -> Vec<NormalizedEvent> {
    let msg_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match msg_type {
        "assistant" => parse_assistant_message(json),
        "user" => parse_tool_results(json),
        "result" => {
            let is_error = json
                .get("is_error")
                .and_then(|e| e.as_bool())
                .unwrap_or(false);
            if !is_error {
                // Final text was already streamed through assistant messages
                return Vec::new();
            }
            let message = str_field(json, &["result", "error", "subtype"])
                .unwrap_or("Agent reported an error")
                .to_string();
            vec![NormalizedEvent::error(message)]
        }
        // system/init, stream_event and anything newer carry nothing canonical
        _ => Vec::new(),
    }
}

fn parse_assistant_message(json: &serde_json::Value) -> Vec<NormalizedEvent> {
    let Some(message) = json.get("message") else {
        return Vec::new();
    };

    let content = match message.get("content") {
        Some(serde_json::Value::Array(items)) => items,
        Some(serde_json::Value::String(text)) if !text.is_empty() => {
            return vec![NormalizedEvent::text(text.clone())];
        }
        _ => return Vec::new(),
    };

    let mut events = Vec::new();
    for item in content {
        match item.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                    if !text.is_empty() {
                        events.push(NormalizedEvent::text(text));
                    }
                }
            }
            Some("tool_use") => {
                let name = item.get("name").and_then(|n| n.as_str()).unwrap_or("tool");
                let id = item.get("id").and_then(|i| i.as_str()).unwrap_or("");
                events.push(NormalizedEvent::ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: item.get("input").cloned().unwrap_or(serde_json::Value::Null),
                });
            }
            _ => {}
        }
    }
    events
}

fn parse_tool_results(json: &serde_json::Value) -> Vec<NormalizedEvent> {
    let Some(content) = json
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
    else {
        return Vec::new();
    };

    content
        .iter()
        .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("tool_result"))
        .map(|item| NormalizedEvent::ToolResult {
            tool_id: item
                .get("tool_use_id")
                .and_then(|t| t.as_str())
                .map(String::from),
            content: item.get("content").map(content_to_string).unwrap_or_default(),
            is_error: item
                .get("is_error")
                .and_then(|e| e.as_bool())
                .unwrap_or(false),
        })
        .collect()
}

/// Final reply carried by Claude's `result` line (stream-json and json modes)
pub fn final_result_text(json: &serde_json::Value) -> Option<String> {
    if json.get("type").and_then(|t| t.as_str()) != Some("result") {
        return None;
    }
    json.get("result")
        .and_then(|r| r.as_str())
        .map(String::from)
}
