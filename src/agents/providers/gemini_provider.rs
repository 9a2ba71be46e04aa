// Gemini CLI provider
//
// Gemini CLI from @google/gemini-cli
// - Binary: gemini
// - Non-interactive: prompt read from stdin
// - Output format: --output-format stream-json (stream/chat), json (review)
// - Autonomous: --yolo
// - Model: --model (default: gemini-2.5-pro)
// - Tool allowlist: `tools.core` in the file named by GEMINI_CLI_SYSTEM_SETTINGS_PATH
// - No resumable sessions addressable by caller ids; chat is emulated

use crate::agents::plugin::{ChatContinuation, CliAgent, SettingsOverride};
use serde_json::json;
use crate::models::AgentType;

/// Provider for Gemini CLI
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiProvider;

impl GeminiProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CliAgent for GeminiProvider {
    fn agent_type(&self) -> AgentType {
        AgentType::Gemini
    }

    fn program(&self) -> &'static str {
        "gemini"
    }

    fn display_name(&self) -> &'static str {
        "Gemini CLI"
    }

    fn builtin_default_model(&self) -> &'static str {
        "gemini-2.5-pro"
    }

    fn stream_args(&self, model: &str, skip_permissions: bool) -> Vec<String> {
        let mut args = vec![
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--model".to_string(),
            model.to_string(),
        ];
        if skip_permissions {
            args.push("--yolo".to_string());
        }
        args
    }

    fn chat_args(&self, model: &str, _continuation: &ChatContinuation) -> Vec<String> {
        self.stream_args(model, false)
    }

    fn review_args(&self, model: &str) -> Vec<String> {
        vec![
            "--output-format".to_string(),
            "json".to_string(),
            "--model".to_string(),
            model.to_string(),
        ]
    }

    /// An empty core-tool allowlist registers no tools for the review
    fn review_settings(&self) -> Option<SettingsOverride> {
        Some(SettingsOverride {
            env_var: "GEMINI_CLI_SYSTEM_SETTINGS_PATH",
            contents: json!({ "tools": { "core": [] } }),
        })
    }
}
