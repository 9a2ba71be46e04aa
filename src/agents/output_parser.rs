// Agent output normalization
//
// Converts raw agent-specific stdout lines into the canonical
// `NormalizedEvent` union. Field extraction for each agent lives in
// format_parsers/.

use crate::agents::format_parsers;
use crate::models::AgentType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Canonical, agent-agnostic unit of streamed output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedEvent {
    Text {
        content: String,
    },
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_id: Option<String>,
        content: String,
        is_error: bool,
    },
    Error {
        message: String,
    },
}

impl NormalizedEvent {
    pub fn text(content: impl Into<String>) -> Self {
        NormalizedEvent::Text {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        NormalizedEvent::Error {
            message: message.into(),
        }
    }
}

/// Per-invocation line normalizer.
///
/// The only state carried between lines is whether a JSON object has been
/// seen yet (prose before the first JSON line is surfaced as text), the set of
/// tool call ids already forwarded, and a counter for ids the agent omitted.
#[derive(Debug)]
pub struct StreamNormalizer {
    agent_type: AgentType,
    seen_json: bool,
    forwarded_tool_ids: HashSet<String>,
    generated_ids: u64,
}

impl StreamNormalizer {
    pub fn new(agent_type: AgentType) -> Self {
        Self {
            agent_type,
            seen_json: false,
            forwarded_tool_ids: HashSet::new(),
            generated_ids: 0,
        }
    }

    pub fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    /// Whether any JSON object has been parsed in this stream
    pub fn has_seen_json(&self) -> bool {
        self.seen_json
    }

    /// Normalize one stdout line into zero or more events. Never fails;
    /// unrecognized lines produce no events.
    pub fn normalize_line(&mut self, line: &str) -> Vec<NormalizedEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let json = match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) if value.is_object() => value,
            _ => {
                if self.seen_json {
                    log::debug!(
                        "[StreamNormalizer] Dropping non-JSON line after structured output started"
                    );
                    return Vec::new();
                }
                return vec![NormalizedEvent::text(line.trim_end_matches('\r'))];
            }
        };

        self.seen_json = true;

        let mut events = match self.agent_type {
            AgentType::Claude => format_parsers::claude::parse_claude_event(&json),
            AgentType::Gemini => format_parsers::gemini::parse_gemini_event(&json),
        };
        if events.is_empty() {
            events = format_parsers::generic::parse_generic_event(&json);
        }

        for event in events.iter_mut() {
            if let NormalizedEvent::ToolCall { id, .. } = event {
                if id.is_empty() {
                    self.generated_ids += 1;
                    *id = format!("{}-tool-{}", self.agent_type, self.generated_ids);
                }
            }
        }

        events
    }

    /// Record that a tool call is about to be forwarded to the caller.
    /// Returns false when the id was already forwarded (e.g. replayed output).
    pub fn first_sighting(&mut self, tool_id: &str) -> bool {
        self.forwarded_tool_ids.insert(tool_id.to_string())
    }
}

/// One-line human summary of a tool call for progress display
pub fn summarize_tool_call(name: &str, input: &serde_json::Value) -> String {
    let field = |key: &str| input.get(key).and_then(|v| v.as_str()).unwrap_or("");

    let detail = match name {
        "Read" | "read_file" => field("file_path").to_string(),
        "Grep" | "search_file_content" => {
            let path = match field("path") {
                "" => ".",
                p => p,
            };
            format!("pattern={:?} in {}", field("pattern"), path)
        }
        "Glob" | "glob" => field("pattern").to_string(),
        "Bash" | "run_shell_command" => {
            crate::utils::truncate_string(field("command"), 80).to_string()
        }
        "Task" => field("description").to_string(),
        _ => match input.get("description").and_then(|v| v.as_str()) {
            Some(description) => description.to_string(),
            None => crate::utils::truncate_string(&input.to_string(), 60).to_string(),
        },
    };

    format!("{}: {}", name, detail)
}
