// Data models shared by the engine contract and its callers

use crate::agents::StreamEventSink;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Supported agent CLIs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Claude,
    Gemini,
}

impl AgentType {
    /// Returns all available agent types
    pub fn all() -> &'static [AgentType] {
        &[AgentType::Claude, AgentType::Gemini]
    }

    /// Returns the string representation of this agent type
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Claude => "claude",
            AgentType::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "claude" => Ok(AgentType::Claude),
            "gemini" => Ok(AgentType::Gemini),
            other => Err(format!("Unknown agent type: {}", other)),
        }
    }
}

/// Result of probing whether an agent CLI is installed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EngineAvailability {
    pub available: bool,
    pub name: String,
    pub version: Option<String>,
}

impl EngineAvailability {
    pub fn unavailable(name: &str) -> Self {
        Self {
            available: false,
            name: name.to_string(),
            version: None,
        }
    }
}

/// Options for one long-running streamed task turn
#[derive(Debug, Clone, Default)]
pub struct RunStreamOptions {
    /// File holding the prompt; its content is written to the agent's stdin
    pub prompt_file: PathBuf,
    pub working_dir: PathBuf,
    /// Directory receiving `iteration_<n>.jsonl`, `.norm.jsonl` and `.err`
    pub log_dir: PathBuf,
    pub iteration: u32,
    /// Receives text, tool call, tool result and error events as they arrive
    pub sink: Option<Arc<dyn StreamEventSink>>,
    /// Let the agent run tools without asking for permission
    pub skip_permissions: bool,
    pub model: Option<String>,
    /// Overrides the configured stream timeout
    pub timeout: Option<Duration>,
}

/// Outcome of a streamed task turn
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunStreamResult {
    /// Process exited 0 without hitting a timeout or output ceiling
    pub success: bool,
    /// The agent emitted the completion marker (implies `success`)
    pub is_complete: bool,
    pub duration_ms: u64,
    /// Accumulated assistant text
    pub output: String,
    pub log_path: PathBuf,
    pub norm_log_path: PathBuf,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    /// Model used for the final attempt
    pub model: String,
    pub timed_out: bool,
    pub output_limit_exceeded: bool,
    pub error: Option<String>,
}

/// Options for one conversational turn
#[derive(Debug, Clone, Default)]
pub struct RunChatOptions {
    pub session_id: String,
    pub message: String,
    pub is_first_message: bool,
    /// Document the conversation is about, included in the prompt
    pub spec_context: Option<String>,
    pub model: Option<String>,
    pub working_dir: Option<PathBuf>,
    /// Receives raw stdout lines (`on_raw_line`) and normalized events
    pub sink: Option<Arc<dyn StreamEventSink>>,
    pub timeout: Option<Duration>,
}

/// Outcome of a conversational turn
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunChatResult {
    /// Final assistant reply
    pub response: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl RunChatResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Options for a one-shot, tool-free structured review
#[derive(Debug, Clone, Default)]
pub struct ReviewOptions {
    pub prompt: String,
    /// When set, the resolved feedback is written here as JSON
    pub output_file: Option<PathBuf>,
    pub model: Option<String>,
    pub timeout: Option<Duration>,
    pub working_dir: Option<PathBuf>,
}

/// Outcome of a structured review
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    pub success: bool,
    /// Always present; defaults to a FAIL verdict when nothing could be parsed
    pub feedback: ReviewFeedback,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Review outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    #[default]
    Fail,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
        }
    }
}

/// Structured peer review of a document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFeedback {
    pub verdict: Verdict,
    #[serde(default)]
    pub missing_requirements: Vec<String>,
    #[serde(default)]
    pub contradictions: Vec<String>,
    #[serde(default)]
    pub dependency_errors: Vec<String>,
    #[serde(default)]
    pub duplicates: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_groupings: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standalone_tasks: Option<Vec<String>>,
}

impl ReviewFeedback {
    /// Total number of reported issues across all lists
    pub fn issue_count(&self) -> usize {
        self.missing_requirements.len()
            + self.contradictions.len()
            + self.dependency_errors.len()
            + self.duplicates.len()
    }
}

/// Speaker of a chat history entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn label(&self) -> &'static str {
        match self {
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
        }
    }
}

/// One persisted turn of a chat session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatHistoryEntry {
    pub role: ChatRole,
    pub content: String,
}

impl ChatHistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_type_round_trip() {
        for agent in AgentType::all() {
            assert_eq!(agent.as_str().parse::<AgentType>().unwrap(), *agent);
        }
        assert!("cursor".parse::<AgentType>().is_err());
    }

    #[test]
    fn test_review_feedback_default_is_fail() {
        let feedback = ReviewFeedback::default();
        assert_eq!(feedback.verdict, Verdict::Fail);
        assert_eq!(feedback.issue_count(), 0);
    }

    #[test]
    fn test_review_feedback_serialization_shape() {
        let feedback = ReviewFeedback {
            verdict: Verdict::Pass,
            suggestions: vec!["Add a glossary".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(&feedback).unwrap();
        assert_eq!(json["verdict"], "PASS");
        assert_eq!(json["missingRequirements"], serde_json::json!([]));
        assert!(json.get("taskGroupings").is_none());
    }

    #[test]
    fn test_history_entry_serialization() {
        let entry = ChatHistoryEntry::assistant("Hello");
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"Hello"}"#);
    }
}
