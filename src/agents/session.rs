//! Chat session emulation
//!
//! Agents without native conversation resumption get the whole conversation
//! replayed on every turn: the history is loaded from disk, the new user
//! message is appended, and a prompt is synthesized from optional one-time
//! instructions, optional document context and the labeled transcript.
//!
//! A turn holds an exclusive `history.lock` for its whole duration so two
//! turns on the same session id serialize instead of racing on
//! `history.json`.

use crate::error::{EngineError, EngineResult};
use crate::file_storage::history::{get_session_dir, load_history, save_history, LOCK_FILE};
use crate::file_storage::ensure_dir;
use crate::models::ChatHistoryEntry;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Instructions sent once, on the first message of a session
pub const CHAT_SYSTEM_INSTRUCTIONS: &str = "You are an AI coding assistant in a multi-turn conversation. \
You do not retain memory between turns, so the conversation so far is included below. \
Answer the latest user message directly and stay consistent with your earlier replies.";

const RESPOND_INSTRUCTION: &str =
    "Respond to the latest User message above, taking the whole conversation into account.";

/// Synthesize the prompt for an emulated chat turn.
///
/// `history` must already end with the new user message.
pub fn build_chat_prompt(
    history: &[ChatHistoryEntry],
    is_first_message: bool,
    spec_context: Option<&str>,
) -> String {
    let mut prompt = String::new();

    if is_first_message {
        prompt.push_str(CHAT_SYSTEM_INSTRUCTIONS);
        prompt.push_str("\n\n");
    }

    push_context(&mut prompt, spec_context);

    if !history.is_empty() {
        prompt.push_str("=== Conversation History ===\n\n");
        for entry in history {
            prompt.push_str(&format!("{}: {}\n\n", entry.role.label(), entry.content));
        }
        prompt.push_str("=== End History ===\n\n");
    }

    prompt.push_str(RESPOND_INSTRUCTION);
    prompt
}

/// Prompt for agents that resume the conversation natively: the agent keeps
/// its own transcript, so only the new message (and first-turn setup) is sent.
pub fn build_native_prompt(
    message: &str,
    is_first_message: bool,
    spec_context: Option<&str>,
) -> String {
    if !is_first_message {
        return message.to_string();
    }

    let mut prompt = String::new();
    prompt.push_str(CHAT_SYSTEM_INSTRUCTIONS);
    prompt.push_str("\n\n");
    push_context(&mut prompt, spec_context);
    prompt.push_str(message);
    prompt
}

fn push_context(prompt: &mut String, spec_context: Option<&str>) {
    if let Some(context) = spec_context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str("=== Document ===\n");
        prompt.push_str(context);
        prompt.push_str("\n=== End Document ===\n\n");
    }
}

/// Exclusive per-session lock on `<session_dir>/history.lock`, released on drop
#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    /// Block (on the blocking pool) until the session lock is held
    pub async fn acquire(session_dir: &Path) -> EngineResult<Self> {
        let dir = session_dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::acquire_blocking(&dir))
            .await
            .map_err(|e| EngineError::History {
                session_id: String::new(),
                message: format!("Lock task failed: {}", e),
            })?
    }

    fn acquire_blocking(session_dir: &Path) -> EngineResult<Self> {
        ensure_dir(session_dir)?;
        let path = session_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| EngineError::io(&path, e))?;
        FileExt::lock_exclusive(&file).map_err(|e| EngineError::io(&path, e))?;
        log::debug!("[Session] Acquired {:?}", path);
        Ok(Self { file, path })
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("[Session] Failed to release {:?}: {}", self.path, e);
        }
    }
}

/// One locked chat turn over a session's persisted history
#[derive(Debug)]
pub struct ChatSessionTurn {
    session_id: String,
    dir: PathBuf,
    history: Vec<ChatHistoryEntry>,
    _lock: SessionLock,
}

impl ChatSessionTurn {
    /// Lock the session and load its history (capped to `max_entries`)
    pub async fn begin(
        sessions_dir: &Path,
        session_id: &str,
        max_entries: usize,
    ) -> EngineResult<Self> {
        let dir = get_session_dir(sessions_dir, session_id)?;
        let lock = SessionLock::acquire(&dir).await?;

        let history = {
            let dir = dir.clone();
            tokio::task::spawn_blocking(move || load_history(&dir, max_entries))
                .await
                .map_err(|e| EngineError::History {
                    session_id: session_id.to_string(),
                    message: format!("Load task failed: {}", e),
                })??
        };

        log::debug!(
            "[Session] {} loaded {} history entries",
            session_id,
            history.len()
        );

        Ok(Self {
            session_id: session_id.to_string(),
            dir,
            history,
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn history(&self) -> &[ChatHistoryEntry] {
        &self.history
    }

    pub fn push_user(&mut self, message: &str) {
        self.history.push(ChatHistoryEntry::user(message));
    }

    /// Prompt for the emulated turn; call after `push_user`
    pub fn prompt(&self, is_first_message: bool, spec_context: Option<&str>) -> String {
        build_chat_prompt(&self.history, is_first_message, spec_context)
    }

    /// Append the reply and persist the full history, then release the lock
    pub async fn commit(mut self, reply: &str) -> EngineResult<()> {
        self.history.push(ChatHistoryEntry::assistant(reply));

        let dir = self.dir.clone();
        let history = std::mem::take(&mut self.history);
        let session_id = self.session_id.clone();
        tokio::task::spawn_blocking(move || save_history(&dir, &history))
            .await
            .map_err(|e| EngineError::History {
                session_id,
                message: format!("Save task failed: {}", e),
            })?
    }
}
