// Agent process spawning, supervision and output normalization

pub mod completion;
pub mod engine;
pub mod fallback;
pub mod format_parsers;
pub mod log_collector;
pub mod output_parser;
pub mod path_resolver;
// Engine contract and CLI argument contracts
pub mod plugin;
pub mod providers;
pub mod rate_limiter;
pub mod session;
pub mod sink;
pub mod supervisor;

// Re-export for convenience
pub use completion::CompletionDetector;
pub use engine::CliEngine;
pub use output_parser::{NormalizedEvent, StreamNormalizer};
pub use plugin::{AgentEngine, ChatContinuation, CliAgent, SettingsOverride};
pub use providers::{create_engine, ClaudeProvider, GeminiProvider};
pub use sink::{ChannelSink, StreamEventSink};
// Note: CapacityDetector and CapacityRetryController accessible via full path
