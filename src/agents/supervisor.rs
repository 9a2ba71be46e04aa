//! Process supervision for a single agent invocation
//!
//! Spawns the agent CLI with piped stdio, writes the prompt to stdin and
//! closes it, then consumes stdout/stderr concurrently:
//!
//! - stdout is split into lines (a trailing partial line is flushed at EOF),
//!   each line is logged raw, normalized, logged again as canonical events and
//!   forwarded to the caller's sink
//! - stdout and stderr have independent byte ceilings; crossing the stdout
//!   ceiling terminates the agent, crossing the stderr ceiling only stops
//!   capturing
//! - a wall-clock timeout sends a graceful terminate signal and escalates to a
//!   forced kill after the grace window
//!
//! The supervisor never returns an error: spawn failures, timeouts and limit
//! violations are all reported on `SupervisedRun`.

use crate::agents::completion::CompletionDetector;
use crate::agents::format_parsers::final_reply_text;
use crate::agents::log_collector::{InvocationLogs, InvocationMetadata, LogLayout};
use crate::agents::output_parser::{NormalizedEvent, StreamNormalizer};
use crate::agents::sink::{dispatch_event, StreamEventSink};
use crate::config::LimitsConfig;
use crate::models::AgentType;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::{sleep_until, timeout, timeout_at};

const READ_CHUNK_BYTES: usize = 8192;

/// Everything needed to run one agent process
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub agent_type: AgentType,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the child
    pub env: Vec<(String, String)>,
    /// Written to stdin, which is then closed
    pub stdin_payload: String,
    pub timeout: Duration,
    pub limits: LimitsConfig,
    /// Where to write raw/normalized/stderr logs; `None` disables logging
    pub log_layout: Option<LogLayout>,
    pub metadata: InvocationMetadata,
    pub sink: Option<Arc<dyn StreamEventSink>>,
    pub completion: Option<CompletionDetector>,
}

/// Why the supervisor signalled the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    Timeout,
    OutputLimit,
}

/// Outcome of a supervised invocation
#[derive(Debug, Clone, Default)]
pub struct SupervisedRun {
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    /// Accumulated assistant text from normalized events
    pub output: String,
    /// Raw stdout kept (at most the stdout ceiling)
    pub stdout: String,
    /// Raw stderr kept (at most the stderr ceiling)
    pub stderr: String,
    /// Final reply reported by a terminal result line, if any
    pub final_reply: Option<String>,
    pub timed_out: bool,
    pub output_limit_exceeded: bool,
    pub stderr_truncated: bool,
    pub termination: Option<TerminationCause>,
    /// Number of graceful terminate signals sent (0 or 1)
    pub terminate_signals: u32,
    pub forced_kill: bool,
    pub completion_detected: bool,
    pub spawn_error: Option<String>,
    pub duration: Duration,
}

impl SupervisedRun {
    /// Exit code 0 with no timeout, no ceiling violation and no spawn failure
    pub fn exited_cleanly(&self) -> bool {
        self.spawn_error.is_none()
            && !self.timed_out
            && !self.output_limit_exceeded
            && self.exit_code == Some(0)
    }

    /// Human-readable failure description, `None` when the run was clean
    pub fn failure_message(&self, timeout: Duration) -> Option<String> {
        if let Some(err) = &self.spawn_error {
            return Some(err.clone());
        }
        if self.timed_out {
            return Some(crate::error::EngineError::Timeout(timeout.as_secs()).to_string());
        }
        if self.output_limit_exceeded {
            return Some("Agent output exceeded the stdout limit and was terminated".to_string());
        }
        match self.exit_code {
            Some(0) => None,
            Some(code) => {
                let stderr_tail = crate::utils::tail_string(self.stderr.trim(), 500);
                if stderr_tail.is_empty() {
                    Some(format!("Agent exited with code {}", code))
                } else {
                    Some(format!("Agent exited with code {}: {}", code, stderr_tail))
                }
            }
            None => Some("Agent was terminated by a signal".to_string()),
        }
    }
}

/// Line-level processing state for stdout
struct LineProcessor {
    normalizer: StreamNormalizer,
    logs: InvocationLogs,
    sink: Option<Arc<dyn StreamEventSink>>,
    output: String,
    final_reply: Option<String>,
    /// Last text appended was a Gemini stream delta
    in_delta_run: bool,
    /// Leading bytes of the line buffer already known to hold no newline
    scanned: usize,
}

impl LineProcessor {
    fn new(
        agent_type: AgentType,
        logs: InvocationLogs,
        sink: Option<Arc<dyn StreamEventSink>>,
    ) -> Self {
        Self {
            normalizer: StreamNormalizer::new(agent_type),
            logs,
            sink,
            output: String::new(),
            final_reply: None,
            in_delta_run: false,
            scanned: 0,
        }
    }

    async fn process_line(&mut self, raw: &[u8]) {
        let decoded = String::from_utf8_lossy(raw);
        let line = decoded.trim_end_matches('\r');

        self.logs.write_raw_line(line).await;
        if let Some(sink) = &self.sink {
            sink.on_raw_line(line);
        }

        let events = self.normalizer.normalize_line(line);
        let was_prose = !self.normalizer.has_seen_json();

        if !was_prose && (line.contains("\"result\"") || line.contains("\"response\"")) {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(line.trim()) {
                if let Some(reply) = final_reply_text(self.normalizer.agent_type(), &json) {
                    self.final_reply = Some(reply);
                }
            }
        }

        for event in &events {
            self.logs.write_event(event).await;

            if let NormalizedEvent::Text { content } = event {
                self.append_text(content, was_prose);
            }

            let forward = match event {
                NormalizedEvent::ToolCall { id, .. } => self.normalizer.first_sighting(id),
                _ => true,
            };
            if forward {
                if let Some(sink) = &self.sink {
                    dispatch_event(sink.as_ref(), event);
                }
            }
        }
    }

    fn append_text(&mut self, content: &str, was_prose: bool) {
        // Gemini streams deltas that concatenate directly; Claude emits whole
        // blocks and prose arrives one line at a time.
        let is_delta = !was_prose && self.normalizer.agent_type() == AgentType::Gemini;
        let joins_directly = is_delta && self.in_delta_run;
        if !joins_directly && !self.output.is_empty() && !self.output.ends_with('\n') {
            self.output.push('\n');
        }
        self.output.push_str(content);
        self.in_delta_run = is_delta;
    }

    /// Process every complete line in `buffer`, leaving a partial tail behind
    async fn drain_lines(&mut self, buffer: &mut Vec<u8>) {
        let mut line_start = 0;
        let mut from = self.scanned.min(buffer.len());
        while let Some(offset) = buffer[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            self.process_line(&buffer[line_start..end]).await;
            line_start = end + 1;
            from = line_start;
        }
        buffer.drain(..line_start);
        self.scanned = buffer.len();
    }
}

/// Send the graceful terminate signal (SIGTERM on unix)
fn send_terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: plain syscall on a pid we own; failure (already exited) is harmless
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                log::debug!("[Supervisor] SIGTERM to {} failed (process gone?)", pid);
            }
            return;
        }
    }
    if let Err(e) = child.start_kill() {
        log::debug!("[Supervisor] start_kill failed: {}", e);
    }
}

async fn force_kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        log::debug!("[Supervisor] Forced kill failed: {}", e);
    }
}

/// Spawn and supervise one agent process until it exits or is killed
pub async fn run_supervised(spec: SpawnSpec) -> SupervisedRun {
    let started = Instant::now();
    let mut run = SupervisedRun::default();

    let mut logs = match &spec.log_layout {
        Some(layout) => InvocationLogs::open(layout).await,
        None => InvocationLogs::disabled(),
    };

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .envs(spec.env.iter().map(|(key, value)| (key, value)))
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }

    log::info!(
        "[Supervisor] Spawning {} ({:?}) with {} args, timeout {}s",
        spec.agent_type,
        spec.program,
        spec.args.len(),
        spec.timeout.as_secs()
    );

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            let message = crate::error::EngineError::Spawn {
                program: spec.program.display().to_string(),
                source: e,
            }
            .to_string();
            log::warn!("[Supervisor] {}", message);
            logs.write_metadata(&spec.metadata).await;
            logs.write_event(&NormalizedEvent::error(message.clone()))
                .await;
            logs.close().await;
            run.spawn_error = Some(message);
            run.duration = started.elapsed();
            return run;
        }
    };

    run.pid = child.id();
    let mut metadata = spec.metadata.clone();
    metadata.pid = run.pid;
    logs.write_metadata(&metadata).await;

    let (mut stdout, mut stderr) = match (child.stdout.take(), child.stderr.take()) {
        (Some(stdout), Some(stderr)) => (stdout, stderr),
        _ => {
            let message = "Failed to capture agent stdout/stderr".to_string();
            log::warn!("[Supervisor] {}", message);
            force_kill(&mut child).await;
            logs.write_event(&NormalizedEvent::error(message.clone()))
                .await;
            logs.close().await;
            run.spawn_error = Some(message);
            run.duration = started.elapsed();
            return run;
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        let payload = spec.stdin_payload.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                log::debug!("[Supervisor] Writing prompt to stdin failed: {}", e);
            }
            let _ = stdin.shutdown().await;
        });
    }

    let mut processor = LineProcessor::new(spec.agent_type, logs, spec.sink.clone());

    let limits = &spec.limits;
    let deadline = tokio::time::Instant::now() + spec.timeout;
    let mut kill_deadline: Option<tokio::time::Instant> = None;

    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut stdout_bytes = 0usize;
    let mut stdout_kept: Vec<u8> = Vec::new();
    let mut stderr_kept: Vec<u8> = Vec::new();
    let mut line_buffer: Vec<u8> = Vec::new();
    let mut out_chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut err_chunk = vec![0u8; READ_CHUNK_BYTES];

    while stdout_open || stderr_open {
        tokio::select! {
            read = stdout.read(&mut out_chunk), if stdout_open => match read {
                Ok(0) => stdout_open = false,
                Ok(n) => {
                    let keep = n.min(limits.stdout_max_bytes.saturating_sub(stdout_bytes));
                    stdout_bytes += keep;
                    stdout_kept.extend_from_slice(&out_chunk[..keep]);
                    line_buffer.extend_from_slice(&out_chunk[..keep]);
                    processor.drain_lines(&mut line_buffer).await;

                    if keep < n {
                        log::warn!(
                            "[Supervisor] stdout exceeded {} bytes, terminating agent",
                            limits.stdout_max_bytes
                        );
                        run.output_limit_exceeded = true;
                        stdout_open = false;
                        if run.termination.is_none() {
                            run.termination = Some(TerminationCause::OutputLimit);
                            run.terminate_signals += 1;
                            send_terminate(&mut child);
                            kill_deadline = Some(tokio::time::Instant::now() + limits.kill_grace());
                        }
                    }
                }
                Err(e) => {
                    log::warn!("[Supervisor] stdout read failed: {}", e);
                    stdout_open = false;
                }
            },
            read = stderr.read(&mut err_chunk), if stderr_open => match read {
                Ok(0) => stderr_open = false,
                Ok(n) => {
                    let keep = n.min(limits.stderr_max_bytes.saturating_sub(stderr_kept.len()));
                    if keep > 0 {
                        processor.logs.write_stderr(&err_chunk[..keep]).await;
                        stderr_kept.extend_from_slice(&err_chunk[..keep]);
                    }
                    if keep < n && !run.stderr_truncated {
                        log::warn!(
                            "[Supervisor] stderr exceeded {} bytes, discarding the rest",
                            limits.stderr_max_bytes
                        );
                        run.stderr_truncated = true;
                    }
                }
                Err(e) => {
                    log::warn!("[Supervisor] stderr read failed: {}", e);
                    stderr_open = false;
                }
            },
            _ = sleep_until(deadline), if kill_deadline.is_none() => {
                log::warn!(
                    "[Supervisor] Agent timed out after {}s, sending terminate signal",
                    spec.timeout.as_secs()
                );
                run.timed_out = true;
                run.termination = Some(TerminationCause::Timeout);
                run.terminate_signals += 1;
                send_terminate(&mut child);
                kill_deadline = Some(tokio::time::Instant::now() + limits.kill_grace());
            },
            _ = sleep_until(kill_deadline.unwrap_or(deadline)), if kill_deadline.is_some() => {
                log::warn!("[Supervisor] Grace period elapsed, killing agent");
                run.forced_kill = true;
                force_kill(&mut child).await;
                break;
            },
        }
    }

    if !line_buffer.is_empty() {
        let tail = std::mem::take(&mut line_buffer);
        processor.process_line(&tail).await;
    }

    // Pipes are closed (or abandoned); reap the process within the remaining budget
    let status = match kill_deadline {
        Some(kd) => match timeout_at(kd, child.wait()).await {
            Ok(status) => status.ok(),
            Err(_) => {
                log::warn!("[Supervisor] Agent ignored terminate signal, killing");
                run.forced_kill = true;
                force_kill(&mut child).await;
                child.wait().await.ok()
            }
        },
        None => match timeout_at(deadline, child.wait()).await {
            Ok(status) => status.ok(),
            Err(_) => {
                log::warn!(
                    "[Supervisor] Agent closed its output but did not exit within {}s",
                    spec.timeout.as_secs()
                );
                run.timed_out = true;
                run.termination = Some(TerminationCause::Timeout);
                run.terminate_signals += 1;
                send_terminate(&mut child);
                match timeout(limits.kill_grace(), child.wait()).await {
                    Ok(status) => status.ok(),
                    Err(_) => {
                        run.forced_kill = true;
                        force_kill(&mut child).await;
                        child.wait().await.ok()
                    }
                }
            }
        },
    };

    run.exit_code = status.and_then(|s| s.code());
    processor.logs.close().await;

    run.output = processor.output;
    run.final_reply = processor.final_reply;
    run.stdout = String::from_utf8_lossy(&stdout_kept).into_owned();
    run.stderr = String::from_utf8_lossy(&stderr_kept).into_owned();
    run.completion_detected = spec
        .completion
        .as_ref()
        .map(|detector| detector.check(&run.output))
        .unwrap_or(false);
    run.duration = started.elapsed();

    log::info!(
        "[Supervisor] {} exited with {:?} after {}ms (timed_out={}, output_limit={}, complete={})",
        spec.agent_type,
        run.exit_code,
        run.duration.as_millis(),
        run.timed_out,
        run.output_limit_exceeded,
        run.completion_detected
    );

    run
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exited_cleanly() {
        let mut run = SupervisedRun {
            exit_code: Some(0),
            ..Default::default()
        };
        assert!(run.exited_cleanly());
        assert!(run.failure_message(Duration::from_secs(1)).is_none());

        run.output_limit_exceeded = true;
        assert!(!run.exited_cleanly());
        assert!(run
            .failure_message(Duration::from_secs(1))
            .unwrap()
            .contains("stdout limit"));
    }

    #[test]
    fn test_failure_message_includes_stderr_tail() {
        let run = SupervisedRun {
            exit_code: Some(1),
            stderr: "Error: RESOURCE_EXHAUSTED\n".to_string(),
            ..Default::default()
        };
        assert_eq!(
            run.failure_message(Duration::from_secs(5)).unwrap(),
            "Agent exited with code 1: Error: RESOURCE_EXHAUSTED"
        );
    }

    #[test]
    fn test_timeout_message() {
        let run = SupervisedRun {
            timed_out: true,
            ..Default::default()
        };
        assert_eq!(
            run.failure_message(Duration::from_secs(300)).unwrap(),
            "Agent timed out after 300 seconds"
        );
    }

    #[tokio::test]
    async fn test_line_processor_joins_text_per_agent() {
        let mut claude = LineProcessor::new(AgentType::Claude, InvocationLogs::disabled(), None);
        let mut buffer = br#"{"type":"text","text":"first"}
{"type":"text","text":"second"}
{"type":"result","result":"second","is_error":false}
"#
        .to_vec();
        claude.drain_lines(&mut buffer).await;
        assert!(buffer.is_empty());
        assert_eq!(claude.output, "first\nsecond");
        assert_eq!(claude.final_reply.as_deref(), Some("second"));

        let mut gemini = LineProcessor::new(AgentType::Gemini, InvocationLogs::disabled(), None);
        let mut buffer = b"banner line\n{\"type\":\"message\",\"role\":\"assistant\",\"content\":\"Hel\",\"delta\":true}\n{\"type\":\"message\",\"role\":\"assistant\",\"content\":\"lo\",\"delta\":true}\n{\"partial".to_vec();
        gemini.drain_lines(&mut buffer).await;
        assert_eq!(gemini.output, "banner line\nHello");
        assert_eq!(buffer, b"{\"partial".to_vec());
    }

    #[tokio::test]
    async fn test_long_line_split_across_chunks() {
        let mut processor =
            LineProcessor::new(AgentType::Claude, InvocationLogs::disabled(), None);
        let text = "x".repeat(64 * 1024);
        let line = format!(
            "{{\"type\":\"text\",\"text\":\"{}\"}}\n{{\"type\":\"text\",\"text\":\"after\"}}\n",
            text
        );

        let mut buffer = Vec::new();
        for chunk in line.as_bytes().chunks(1000) {
            buffer.extend_from_slice(chunk);
            processor.drain_lines(&mut buffer).await;
            assert_eq!(processor.scanned, buffer.len());
        }

        assert!(buffer.is_empty());
        assert_eq!(processor.output, format!("{}\nafter", text));
    }
}
