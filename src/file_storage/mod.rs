//! File-based storage for the agent execution core
//!
//! Global user storage (`~/.ralph-ui/`):
//! - `engines.yaml` - engine configuration
//! - `chat-sessions/{id}/` - per-session `history.json`, `history.lock` and
//!   `chat_<ts>.*` invocation logs

pub mod history;

use crate::error::{EngineError, EngineResult};
use std::fs;
use std::path::Path;

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> EngineResult<()> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| EngineError::io(path, e))?;
    }
    Ok(())
}

/// Write data to a file atomically (temp file + rename)
pub fn atomic_write(path: &Path, content: &str) -> EngineResult<()> {
    let temp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    fs::write(&temp_path, content).map_err(|e| EngineError::io(&temp_path, e))?;
    fs::rename(&temp_path, path).map_err(|e| EngineError::io(path, e))?;

    Ok(())
}

/// Read a JSON file and deserialize it
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> EngineResult<T> {
    let content = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

/// Write data as pretty-printed JSON atomically
pub fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> EngineResult<()> {
    let content = serde_json::to_string_pretty(data)?;
    atomic_write(path, &content)
}
