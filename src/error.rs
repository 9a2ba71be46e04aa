// Error taxonomy for the agent execution core
//
// These errors never cross the engine contract boundary: engines convert them
// into result values carrying `success = false` and an error message.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("History error for session {session_id}: {message}")]
    History { session_id: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Wrap an `std::io::Error` with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
