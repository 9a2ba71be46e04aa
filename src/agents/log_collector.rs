// Agent log collection for a single invocation
//
// Each invocation writes three append-only artifacts:
// - `<stem>.jsonl`       raw stdout lines as received
// - `<stem>.norm.jsonl`  a metadata line followed by one normalized event per line
// - `<stem>.err`         raw stderr
//
// Write failures are logged and disable the affected stream; they never fail
// the invocation.

use crate::agents::output_parser::NormalizedEvent;
use crate::models::AgentType;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Paths of the three per-invocation artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLayout {
    pub raw: PathBuf,
    pub norm: PathBuf,
    pub err: PathBuf,
}

impl LogLayout {
    fn with_stem(dir: &Path, stem: &str) -> Self {
        Self {
            raw: dir.join(format!("{}.jsonl", stem)),
            norm: dir.join(format!("{}.norm.jsonl", stem)),
            err: dir.join(format!("{}.err", stem)),
        }
    }

    /// `iteration_<n>.*` in the task's log directory
    pub fn for_iteration(log_dir: &Path, iteration: u32) -> Self {
        Self::with_stem(log_dir, &format!("iteration_{}", iteration))
    }

    /// `chat_<ts>.*` in the session directory
    pub fn for_chat(session_dir: &Path, timestamp: &str) -> Self {
        Self::with_stem(session_dir, &format!("chat_{}", timestamp))
    }

    /// `review_<ts>.*` beside the review output
    pub fn for_review(dir: &Path, timestamp: &str) -> Self {
        Self::with_stem(dir, &format!("review_{}", timestamp))
    }
}

/// Leading line of every normalized log
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationMetadata {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub agent: AgentType,
    pub model: String,
    pub iteration: Option<u32>,
    pub session_id: Option<String>,
    pub pid: Option<u32>,
    pub working_dir: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl InvocationMetadata {
    pub fn new(agent: AgentType, model: &str) -> Self {
        Self {
            kind: "metadata",
            agent,
            model: model.to_string(),
            iteration: None,
            session_id: None,
            pid: None,
            working_dir: None,
            started_at: Utc::now(),
        }
    }
}

struct LogStream {
    path: PathBuf,
    writer: Option<BufWriter<tokio::fs::File>>,
}

impl LogStream {
    async fn open(path: &Path) -> Self {
        let writer = match OpenOptions::new().create(true).append(true).open(path).await {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                log::warn!("[LogCollector] Failed to open {:?}: {}", path, e);
                None
            }
        };
        Self {
            path: path.to_path_buf(),
            writer,
        }
    }

    async fn write(&mut self, bytes: &[u8]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writer.write_all(bytes).await {
            log::warn!(
                "[LogCollector] Write to {:?} failed, disabling stream: {}",
                self.path,
                e
            );
            self.writer = None;
        }
    }

    async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush().await {
                log::warn!("[LogCollector] Failed to flush {:?}: {}", self.path, e);
            }
        }
    }
}

/// Open log streams for one invocation
pub struct InvocationLogs {
    raw: Option<LogStream>,
    norm: Option<LogStream>,
    err: Option<LogStream>,
}

impl InvocationLogs {
    /// Logs that discard everything (used by review calls)
    pub fn disabled() -> Self {
        Self {
            raw: None,
            norm: None,
            err: None,
        }
    }

    /// Open all three streams, creating the parent directory if needed
    pub async fn open(layout: &LogLayout) -> Self {
        if let Some(parent) = layout.raw.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                log::warn!("[LogCollector] Failed to create {:?}: {}", parent, e);
            }
        }

        Self {
            raw: Some(LogStream::open(&layout.raw).await),
            norm: Some(LogStream::open(&layout.norm).await),
            err: Some(LogStream::open(&layout.err).await),
        }
    }

    pub async fn write_metadata(&mut self, metadata: &InvocationMetadata) {
        if let Some(stream) = self.norm.as_mut() {
            match serde_json::to_string(metadata) {
                Ok(mut line) => {
                    line.push('\n');
                    stream.write(line.as_bytes()).await;
                }
                Err(e) => log::warn!("[LogCollector] Failed to serialize metadata: {}", e),
            }
        }
    }

    pub async fn write_raw_line(&mut self, line: &str) {
        if let Some(stream) = self.raw.as_mut() {
            stream.write(line.as_bytes()).await;
            stream.write(b"\n").await;
        }
    }

    pub async fn write_event(&mut self, event: &NormalizedEvent) {
        if let Some(stream) = self.norm.as_mut() {
            match serde_json::to_string(event) {
                Ok(mut line) => {
                    line.push('\n');
                    stream.write(line.as_bytes()).await;
                }
                Err(e) => log::warn!("[LogCollector] Failed to serialize event: {}", e),
            }
        }
    }

    pub async fn write_stderr(&mut self, bytes: &[u8]) {
        if let Some(stream) = self.err.as_mut() {
            stream.write(bytes).await;
        }
    }

    /// Flush and close every stream
    pub async fn close(&mut self) {
        for stream in [&mut self.raw, &mut self.norm, &mut self.err]
            .into_iter()
            .flatten()
        {
            stream.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_names() {
        let layout = LogLayout::for_iteration(Path::new("/logs"), 3);
        assert_eq!(layout.raw, PathBuf::from("/logs/iteration_3.jsonl"));
        assert_eq!(layout.norm, PathBuf::from("/logs/iteration_3.norm.jsonl"));
        assert_eq!(layout.err, PathBuf::from("/logs/iteration_3.err"));

        let chat = LogLayout::for_chat(Path::new("/s"), "20250101T000000000Z");
        assert_eq!(chat.norm, PathBuf::from("/s/chat_20250101T000000000Z.norm.jsonl"));

        let review = LogLayout::for_review(Path::new("/out"), "20250101T000000000Z");
        assert_eq!(review.err, PathBuf::from("/out/review_20250101T000000000Z.err"));
    }

    #[tokio::test]
    async fn test_writes_three_artifacts() {
        let temp = TempDir::new().unwrap();
        let layout = LogLayout::for_iteration(&temp.path().join("nested"), 1);

        let mut logs = InvocationLogs::open(&layout).await;
        logs.write_metadata(&InvocationMetadata::new(AgentType::Claude, "sonnet"))
            .await;
        logs.write_raw_line(r#"{"type":"text","text":"hi"}"#).await;
        logs.write_event(&NormalizedEvent::text("hi")).await;
        logs.write_stderr(b"warning: something\n").await;
        logs.close().await;

        let raw = std::fs::read_to_string(&layout.raw).unwrap();
        assert_eq!(raw, "{\"type\":\"text\",\"text\":\"hi\"}\n");

        let norm = std::fs::read_to_string(&layout.norm).unwrap();
        let lines: Vec<&str> = norm.lines().collect();
        assert_eq!(lines.len(), 2);
        let metadata: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(metadata["type"], "metadata");
        assert_eq!(metadata["agent"], "claude");
        assert_eq!(lines[1], r#"{"type":"text","content":"hi"}"#);

        let err = std::fs::read_to_string(&layout.err).unwrap();
        assert_eq!(err, "warning: something\n");
    }

    #[tokio::test]
    async fn test_logs_are_append_only() {
        let temp = TempDir::new().unwrap();
        let layout = LogLayout::for_iteration(temp.path(), 7);

        for _ in 0..2 {
            let mut logs = InvocationLogs::open(&layout).await;
            logs.write_raw_line("line").await;
            logs.close().await;
        }

        let raw = std::fs::read_to_string(&layout.raw).unwrap();
        assert_eq!(raw, "line\nline\n");
    }

    #[tokio::test]
    async fn test_unwritable_location_is_not_fatal() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        // A regular file where the log directory should be
        let layout = LogLayout::for_iteration(&blocker, 1);

        let mut logs = InvocationLogs::open(&layout).await;
        logs.write_raw_line("ignored").await;
        logs.write_event(&NormalizedEvent::text("ignored")).await;
        logs.close().await;
    }
}
