// Engine contract and per-agent CLI argument contracts

use crate::models::{
    AgentType, EngineAvailability, ReviewOptions, ReviewResult, RunChatOptions, RunChatResult,
    RunStreamOptions, RunStreamResult,
};
use async_trait::async_trait;

/// Uniform contract every agent adapter implements.
///
/// No method returns an error or panics: failures are reported on the result
/// values (`success = false` / `error`), and `is_available` reports
/// `available = false` when the CLI cannot be probed.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    fn agent_type(&self) -> AgentType;

    /// Probe whether the CLI is installed and report its version
    async fn is_available(&self) -> EngineAvailability;

    /// Drive one long-running, tool-using turn, streaming events to the sink
    async fn run_stream(&self, options: RunStreamOptions) -> RunStreamResult;

    /// Drive one conversational turn and return the final reply
    async fn run_chat(&self, options: RunChatOptions) -> RunChatResult;

    /// Drive one tool-free analysis turn and return a structured verdict
    async fn run_review(&self, options: ReviewOptions) -> ReviewResult;
}

/// How a chat turn carries conversational context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatContinuation {
    /// Replay the persisted transcript in the prompt
    Emulated,
    /// Start a native CLI session with this id
    NativeStart(String),
    /// Resume a native CLI session with this id
    NativeResume(String),
}

impl ChatContinuation {
    pub fn is_native(&self) -> bool {
        !matches!(self, ChatContinuation::Emulated)
    }
}

/// Settings file handed to an agent through an environment variable
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsOverride {
    /// Variable the CLI reads the settings file path from
    pub env_var: &'static str,
    pub contents: serde_json::Value,
}

/// Command-line contract of one agent CLI.
///
/// The prompt is always written to stdin, so none of these include it.
pub trait CliAgent: Send + Sync + std::fmt::Debug {
    fn agent_type(&self) -> AgentType;

    /// Binary name looked up on PATH
    fn program(&self) -> &'static str;

    /// Human-readable name reported by availability probes
    fn display_name(&self) -> &'static str;

    /// Model used when the configuration does not name one
    fn builtin_default_model(&self) -> &'static str;

    fn stream_args(&self, model: &str, skip_permissions: bool) -> Vec<String>;

    fn chat_args(&self, model: &str, continuation: &ChatContinuation) -> Vec<String>;

    fn review_args(&self, model: &str) -> Vec<String>;

    /// Extra settings a review needs that the CLI only accepts from a file
    fn review_settings(&self) -> Option<SettingsOverride> {
        None
    }

    /// Choose how a chat turn keeps context. Agents without native session
    /// support always emulate.
    fn chat_continuation(&self, _session_id: &str, _is_first_message: bool) -> ChatContinuation {
        ChatContinuation::Emulated
    }
}
