// Claude Code CLI provider
//
// Claude Code from @anthropic-ai/claude-code
// - Binary: claude
// - Non-interactive: --print (prompt read from stdin)
// - Output format: --output-format stream-json --verbose (stream/chat), json (review)
// - Review: --tools= --max-turns 1
// - Autonomous: --dangerously-skip-permissions
// - Model: --model (default: sonnet)
// - Sessions: --session-id <uuid> to start, --resume <uuid> to continue

use crate::agents::plugin::{ChatContinuation, CliAgent};
use crate::models::AgentType;

/// Provider for Claude Code
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeProvider;

impl ClaudeProvider {
    pub fn new() -> Self {
        Self
    }

    fn streaming_args(model: &str) -> Vec<String> {
        vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--model".to_string(),
            model.to_string(),
        ]
    }
}

impl CliAgent for ClaudeProvider {
    fn agent_type(&self) -> AgentType {
        AgentType::Claude
    }

    fn program(&self) -> &'static str {
        "claude"
    }

    fn display_name(&self) -> &'static str {
        "Claude Code"
    }

    fn builtin_default_model(&self) -> &'static str {
        "sonnet"
    }

    fn stream_args(&self, model: &str, skip_permissions: bool) -> Vec<String> {
        let mut args = Self::streaming_args(model);
        if skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        args
    }

    fn chat_args(&self, model: &str, continuation: &ChatContinuation) -> Vec<String> {
        let mut args = Self::streaming_args(model);
        match continuation {
            ChatContinuation::NativeStart(id) => {
                args.push("--session-id".to_string());
                args.push(id.clone());
            }
            ChatContinuation::NativeResume(id) => {
                args.push("--resume".to_string());
                args.push(id.clone());
            }
            ChatContinuation::Emulated => {}
        }
        args
    }

    fn review_args(&self, model: &str) -> Vec<String> {
        vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "--model".to_string(),
            model.to_string(),
            // No tools and a single turn: the review is pure analysis of the prompt
            "--tools=".to_string(),
            "--max-turns".to_string(),
            "1".to_string(),
        ]
    }

    /// Claude sessions are keyed by UUID; other ids fall back to emulation
    fn chat_continuation(&self, session_id: &str, is_first_message: bool) -> ChatContinuation {
        match uuid::Uuid::parse_str(session_id) {
            Ok(uuid) if is_first_message => ChatContinuation::NativeStart(uuid.to_string()),
            Ok(uuid) => ChatContinuation::NativeResume(uuid.to_string()),
            Err(_) => ChatContinuation::Emulated,
        }
    }
}
