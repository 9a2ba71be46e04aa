// Agent CLI provider implementations

mod claude_provider;
mod gemini_provider;

use crate::agents::engine::CliEngine;
use crate::agents::plugin::AgentEngine;
use crate::config::EngineConfig;
use crate::models::AgentType;
use std::sync::Arc;

pub use claude_provider::ClaudeProvider;
pub use gemini_provider::GeminiProvider;

/// Build the engine for an agent type
pub fn create_engine(agent_type: AgentType, config: Arc<EngineConfig>) -> Arc<dyn AgentEngine> {
    match agent_type {
        AgentType::Claude => Arc::new(CliEngine::new(ClaudeProvider::new(), config)),
        AgentType::Gemini => Arc::new(CliEngine::new(GeminiProvider::new(), config)),
    }
}
