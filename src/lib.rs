//! Agent execution core for Ralph UI
//!
//! Drives command-line AI coding agents (Claude Code, Gemini CLI) through one
//! uniform contract (`agents::AgentEngine`): streamed task turns, multi-turn
//! chat and one-shot structured review.

// Module declarations
pub mod agents;
pub mod config;
pub mod error;
pub mod file_storage;
pub mod models;
pub mod parsers;
pub mod utils;

// Re-export the contract surface
pub use agents::{create_engine, AgentEngine, ChannelSink, NormalizedEvent, StreamEventSink};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use models::*;
