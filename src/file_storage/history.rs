//! Chat history file storage
//!
//! Stores the ordered role/content turns of an emulated chat session in
//! `{sessions_dir}/{session_id}/history.json`. Writes are atomic; a turn in
//! progress holds `history.lock` (see `agents::session`).

use super::{read_json, write_json};
use crate::error::{EngineError, EngineResult};
use crate::models::ChatHistoryEntry;
use crate::utils::is_safe_session_id;
use std::path::{Path, PathBuf};

pub const HISTORY_FILE: &str = "history.json";
pub const LOCK_FILE: &str = "history.lock";

/// Directory holding one session's history, lock and invocation logs.
/// Rejects ids that could escape `sessions_dir`.
pub fn get_session_dir(sessions_dir: &Path, session_id: &str) -> EngineResult<PathBuf> {
    if !is_safe_session_id(session_id) {
        return Err(EngineError::InvalidSessionId(session_id.to_string()));
    }
    Ok(sessions_dir.join(session_id))
}

pub fn get_history_path(session_dir: &Path) -> PathBuf {
    session_dir.join(HISTORY_FILE)
}

/// Keep only the most recent `max_entries` entries
pub fn cap_history(mut entries: Vec<ChatHistoryEntry>, max_entries: usize) -> Vec<ChatHistoryEntry> {
    if entries.len() > max_entries {
        let excess = entries.len() - max_entries;
        entries.drain(..excess);
    }
    entries
}

/// Read a session's history, capped to the most recent `max_entries`.
///
/// A missing file is an empty history (first-ever turn). A file that exists
/// but cannot be parsed is an error so the next save does not silently
/// discard it.
pub fn load_history(session_dir: &Path, max_entries: usize) -> EngineResult<Vec<ChatHistoryEntry>> {
    let path = get_history_path(session_dir);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let entries: Vec<ChatHistoryEntry> = read_json(&path).map_err(|e| EngineError::History {
        session_id: session_id_of(session_dir),
        message: e.to_string(),
    })?;

    let total = entries.len();
    let capped = cap_history(entries, max_entries);
    if capped.len() < total {
        log::debug!(
            "[History] Capped {} entries to the most recent {}",
            total,
            capped.len()
        );
    }
    Ok(capped)
}

/// Overwrite a session's history with `entries`
pub fn save_history(session_dir: &Path, entries: &[ChatHistoryEntry]) -> EngineResult<()> {
    write_json(&get_history_path(session_dir), &entries).map_err(|e| EngineError::History {
        session_id: session_id_of(session_dir),
        message: e.to_string(),
    })
}

fn session_id_of(session_dir: &Path) -> String {
    session_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_session_dir_rejects_traversal() {
        let root = Path::new("/sessions");
        assert_eq!(
            get_session_dir(root, "abc-123").unwrap(),
            PathBuf::from("/sessions/abc-123")
        );
        assert!(matches!(
            get_session_dir(root, "../etc"),
            Err(EngineError::InvalidSessionId(_))
        ));
        assert!(get_session_dir(root, "").is_err());
    }

    #[test]
    fn test_missing_history_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(load_history(&temp_dir.path().join("s1"), 100)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_save_and_load_history() {
        let temp_dir = TempDir::new().unwrap();
        let session_dir = temp_dir.path().join("s1");
        let entries = vec![
            ChatHistoryEntry::user("hello"),
            ChatHistoryEntry::assistant("hi there"),
        ];

        save_history(&session_dir, &entries).unwrap();

        let raw = std::fs::read_to_string(get_history_path(&session_dir)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json[0]["role"], "user");
        assert_eq!(json[1]["content"], "hi there");

        assert_eq!(load_history(&session_dir, 100).unwrap(), entries);
    }

    #[test]
    fn test_load_caps_to_most_recent() {
        let temp_dir = TempDir::new().unwrap();
        let session_dir = temp_dir.path().join("s1");
        let entries: Vec<ChatHistoryEntry> = (0..101)
            .map(|i| ChatHistoryEntry::user(format!("m{}", i)))
            .collect();
        save_history(&session_dir, &entries).unwrap();

        let loaded = load_history(&session_dir, 100).unwrap();
        assert_eq!(loaded.len(), 100);
        assert_eq!(loaded[0].content, "m1");
        assert_eq!(loaded[99].content, "m100");
    }

    #[test]
    fn test_corrupt_history_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let session_dir = temp_dir.path().join("s1");
        std::fs::create_dir_all(&session_dir).unwrap();
        std::fs::write(get_history_path(&session_dir), "{oops").unwrap();

        match load_history(&session_dir, 100) {
            Err(EngineError::History { session_id, .. }) => assert_eq!(session_id, "s1"),
            other => panic!("expected history error, got {:?}", other),
        }
    }
}
