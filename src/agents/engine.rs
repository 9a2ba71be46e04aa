//! CLI-backed implementation of the engine contract
//!
//! `CliEngine<A>` runs any `CliAgent` through the process supervisor:
//! - streaming turns go through the capacity retry controller
//! - chat turns either resume a native CLI session or replay the persisted
//!   transcript, holding the session lock for the whole turn
//! - reviews run tool-free and feed stdout to the structured-output extractor

use crate::agents::completion::CompletionDetector;
use crate::agents::fallback::{AttemptOutcome, CapacityRetryController};
use crate::agents::format_parsers::final_reply_text;
use crate::agents::log_collector::{InvocationMetadata, LogLayout};
use crate::agents::path_resolver::{BinaryResolver, CliPathResolver, FixedBinary};
use crate::agents::plugin::{AgentEngine, CliAgent};
use crate::agents::session::{build_native_prompt, ChatSessionTurn};
use crate::agents::supervisor::{run_supervised, SpawnSpec, SupervisedRun};
use crate::config::{AgentSettings, EngineConfig};
use crate::models::{
    AgentType, EngineAvailability, ReviewFeedback, ReviewOptions, ReviewResult, RunChatOptions,
    RunChatResult, RunStreamOptions, RunStreamResult,
};
use crate::parsers::structured_output::{extract_review_feedback, PARSE_FAILED_ISSUE};
use crate::utils::{file_timestamp, is_safe_model_name, resolve_model};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::process::Command;

static VERSION_REGEX: OnceLock<Regex> = OnceLock::new();

fn version_regex() -> &'static Regex {
    VERSION_REGEX.get_or_init(|| {
        Regex::new(r"\d+\.\d+(?:\.\d+)?(?:[-+][0-9A-Za-z.-]+)?").expect("version regex is valid")
    })
}

/// Pull a version number out of `--version` output
pub fn parse_version(output: &str) -> Option<String> {
    let output = output.trim();
    if output.is_empty() {
        return None;
    }
    match version_regex().find(output) {
        Some(m) => Some(m.as_str().to_string()),
        None => output.lines().next().map(|line| line.trim().to_string()),
    }
}

/// Engine contract implementation for one agent CLI
#[derive(Debug)]
pub struct CliEngine<A: CliAgent> {
    agent: A,
    config: Arc<EngineConfig>,
    resolver: Arc<dyn BinaryResolver>,
    retry: CapacityRetryController,
    completion: CompletionDetector,
}

impl<A: CliAgent> CliEngine<A> {
    pub fn new(agent: A, config: Arc<EngineConfig>) -> Self {
        let settings = config.agent(agent.agent_type());
        let resolver: Arc<dyn BinaryResolver> = match &settings.binary {
            Some(path) => Arc::new(FixedBinary::new(path)),
            None => Arc::new(CliPathResolver),
        };
        let retry = CapacityRetryController::new(&config.retry, settings.fallback_models.clone());
        let completion = CompletionDetector::from_config(&config.completion);

        Self {
            agent,
            config,
            resolver,
            retry,
            completion,
        }
    }

    /// Replace the binary lookup (e.g. to point at a wrapper script)
    pub fn with_resolver(mut self, resolver: Arc<dyn BinaryResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    fn settings(&self) -> &AgentSettings {
        self.config.agent(self.agent.agent_type())
    }

    /// Configured default model, or the built-in one when it is unset or
    /// not safe to place on a command line
    fn default_model(&self) -> &str {
        let configured = self.settings().default_model.trim();
        if configured.is_empty() {
            return self.agent.builtin_default_model();
        }
        if !is_safe_model_name(configured) {
            log::warn!(
                "[{}] Ignoring unsafe default model {:?}, using {}",
                self.agent.display_name(),
                configured,
                self.agent.builtin_default_model()
            );
            return self.agent.builtin_default_model();
        }
        configured
    }

    fn model_for(&self, requested: Option<&str>) -> String {
        resolve_model(requested, self.default_model())
    }

    fn resolve_binary(&self) -> Option<PathBuf> {
        self.resolver.resolve(self.agent.program())
    }

    fn not_found_message(&self) -> String {
        format!("{} CLI not found ({})", self.agent.display_name(), self.agent.program())
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_spec(
        &self,
        program: &Path,
        args: Vec<String>,
        working_dir: Option<&Path>,
        prompt: &str,
        timeout: Duration,
        log_layout: Option<LogLayout>,
        metadata: InvocationMetadata,
        sink: Option<Arc<dyn crate::agents::StreamEventSink>>,
    ) -> SpawnSpec {
        SpawnSpec {
            agent_type: self.agent.agent_type(),
            program: program.to_path_buf(),
            args,
            working_dir: working_dir.map(Path::to_path_buf),
            env: Vec::new(),
            stdin_payload: prompt.to_string(),
            timeout,
            limits: self.config.limits.clone(),
            log_layout,
            metadata,
            sink,
            completion: Some(self.completion.clone()),
        }
    }

    async fn stream_attempt(
        &self,
        program: &Path,
        prompt: &str,
        options: &RunStreamOptions,
        timeout: Duration,
        model: String,
    ) -> AttemptOutcome {
        let layout = LogLayout::for_iteration(&options.log_dir, options.iteration);
        let mut metadata = InvocationMetadata::new(self.agent.agent_type(), &model);
        metadata.iteration = Some(options.iteration);
        metadata.working_dir = Some(options.working_dir.display().to_string());

        let spec = self.spawn_spec(
            program,
            self.agent.stream_args(&model, options.skip_permissions),
            Some(&options.working_dir),
            prompt,
            timeout,
            Some(layout.clone()),
            metadata,
            options.sink.clone(),
        );
        let run = run_supervised(spec).await;

        AttemptOutcome {
            result: stream_result(&run, &layout, model, timeout),
            stderr: run.stderr,
        }
    }
}

fn stream_result(
    run: &SupervisedRun,
    layout: &LogLayout,
    model: String,
    timeout: Duration,
) -> RunStreamResult {
    let success = run.exited_cleanly();
    RunStreamResult {
        success,
        is_complete: success && run.completion_detected,
        duration_ms: run.duration.as_millis() as u64,
        output: run.output.clone(),
        log_path: layout.raw.clone(),
        norm_log_path: layout.norm.clone(),
        exit_code: run.exit_code,
        pid: run.pid,
        model,
        timed_out: run.timed_out,
        output_limit_exceeded: run.output_limit_exceeded,
        error: run.failure_message(timeout),
    }
}

/// Text the review verdict is extracted from: the agent's final reply when the
/// output is a JSON envelope, otherwise raw stdout
fn review_text(agent_type: AgentType, run: &SupervisedRun) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(run.stdout.trim()) {
        if let Some(reply) = final_reply_text(agent_type, &json) {
            return reply;
        }
    }
    match &run.final_reply {
        Some(reply) if !reply.trim().is_empty() => reply.clone(),
        _ => run.stdout.clone(),
    }
}

/// Final chat reply: the terminal result text when present, else streamed text
fn chat_reply(run: &SupervisedRun) -> String {
    match &run.final_reply {
        Some(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
        _ => run.output.trim().to_string(),
    }
}

/// Review logs sit next to the output file, else in the configured review log dir
fn review_log_dir(options: &ReviewOptions, config: &EngineConfig) -> PathBuf {
    options
        .output_file
        .as_deref()
        .and_then(Path::parent)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.logs.review_dir.clone())
}

async fn write_json_file<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize {:?}: {}", path, e))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("Failed to create {:?}: {}", parent, e))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| format!("Failed to write {:?}: {}", path, e))
}

#[async_trait]
impl<A: CliAgent> AgentEngine for CliEngine<A> {
    fn agent_type(&self) -> AgentType {
        self.agent.agent_type()
    }

    async fn is_available(&self) -> EngineAvailability {
        let name = self.agent.display_name();
        let Some(binary) = self.resolve_binary() else {
            log::debug!("[{}] {}", name, self.not_found_message());
            return EngineAvailability::unavailable(name);
        };

        let mut command = Command::new(&binary);
        command
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let probe_timeout = Duration::from_secs(self.config.timeouts.version_probe_secs);
        match tokio::time::timeout(probe_timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                EngineAvailability {
                    available: true,
                    name: name.to_string(),
                    version: parse_version(&stdout),
                }
            }
            Ok(Ok(output)) => {
                log::warn!(
                    "[{}] {:?} --version exited with {:?}",
                    name,
                    binary,
                    output.status.code()
                );
                EngineAvailability::unavailable(name)
            }
            Ok(Err(e)) => {
                log::warn!("[{}] Failed to run {:?} --version: {}", name, binary, e);
                EngineAvailability::unavailable(name)
            }
            Err(_) => {
                log::warn!(
                    "[{}] Version probe timed out after {}s",
                    name,
                    probe_timeout.as_secs()
                );
                EngineAvailability::unavailable(name)
            }
        }
    }

    async fn run_stream(&self, options: RunStreamOptions) -> RunStreamResult {
        let started = Instant::now();
        let model = self.model_for(options.model.as_deref());
        let layout = LogLayout::for_iteration(&options.log_dir, options.iteration);
        let failed = |error: String| RunStreamResult {
            model: model.clone(),
            log_path: layout.raw.clone(),
            norm_log_path: layout.norm.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            error: Some(error),
            ..Default::default()
        };

        let Some(binary) = self.resolve_binary() else {
            return failed(self.not_found_message());
        };

        let prompt = match tokio::fs::read_to_string(&options.prompt_file).await {
            Ok(prompt) => prompt,
            Err(e) => {
                return failed(format!(
                    "Failed to read prompt file {:?}: {}",
                    options.prompt_file, e
                ))
            }
        };

        let timeout = options
            .timeout
            .unwrap_or_else(|| Duration::from_secs(self.config.timeouts.stream_secs));

        log::info!(
            "[{}] Stream iteration {} with model {} in {:?}",
            self.agent.display_name(),
            options.iteration,
            model,
            options.working_dir
        );

        let binary = binary.as_path();
        let prompt = prompt.as_str();
        let opts = &options;
        let mut result = self
            .retry
            .run(model.clone(), move |model| {
                self.stream_attempt(binary, prompt, opts, timeout, model)
            })
            .await;

        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }

    async fn run_chat(&self, options: RunChatOptions) -> RunChatResult {
        let started = Instant::now();
        let failed = |error: String| RunChatResult {
            response: String::new(),
            duration_ms: started.elapsed().as_millis() as u64,
            error: Some(error),
        };

        let Some(binary) = self.resolve_binary() else {
            return failed(self.not_found_message());
        };

        let chat = &self.config.chat;
        let mut turn =
            match ChatSessionTurn::begin(&chat.sessions_dir, &options.session_id, chat.max_history_entries)
                .await
            {
                Ok(turn) => turn,
                Err(e) => return failed(e.to_string()),
            };
        turn.push_user(&options.message);

        let model = self.model_for(options.model.as_deref());
        let continuation = self
            .agent
            .chat_continuation(&options.session_id, options.is_first_message);
        let prompt = if continuation.is_native() {
            build_native_prompt(
                &options.message,
                options.is_first_message,
                options.spec_context.as_deref(),
            )
        } else {
            turn.prompt(options.is_first_message, options.spec_context.as_deref())
        };

        let timeout = options
            .timeout
            .unwrap_or_else(|| Duration::from_secs(self.config.timeouts.chat_secs));
        let layout = LogLayout::for_chat(turn.dir(), &file_timestamp());
        let mut metadata = InvocationMetadata::new(self.agent.agent_type(), &model);
        metadata.session_id = Some(options.session_id.clone());
        metadata.working_dir = options
            .working_dir
            .as_ref()
            .map(|dir| dir.display().to_string());

        log::info!(
            "[{}] Chat turn for session {} ({:?}, {} history entries)",
            self.agent.display_name(),
            options.session_id,
            continuation,
            turn.history().len()
        );

        let spec = self.spawn_spec(
            &binary,
            self.agent.chat_args(&model, &continuation),
            options.working_dir.as_deref(),
            &prompt,
            timeout,
            Some(layout),
            metadata,
            options.sink.clone(),
        );
        let run = run_supervised(spec).await;
        let response = chat_reply(&run);

        if let Some(error) = run.failure_message(timeout) {
            return RunChatResult {
                response,
                duration_ms: started.elapsed().as_millis() as u64,
                error: Some(error),
            };
        }
        if response.is_empty() {
            return failed("Agent returned an empty response".to_string());
        }

        if let Err(e) = turn.commit(&response).await {
            log::warn!(
                "[{}] Failed to persist history for {}: {}",
                self.agent.display_name(),
                options.session_id,
                e
            );
        }

        RunChatResult {
            response,
            duration_ms: started.elapsed().as_millis() as u64,
            error: None,
        }
    }

    async fn run_review(&self, options: ReviewOptions) -> ReviewResult {
        let started = Instant::now();
        let failed = |error: String, stdout: String, stderr: String| ReviewResult {
            success: false,
            feedback: ReviewFeedback::default(),
            stdout,
            stderr,
            duration_ms: started.elapsed().as_millis() as u64,
            error: Some(error),
        };

        let Some(binary) = self.resolve_binary() else {
            return failed(self.not_found_message(), String::new(), String::new());
        };

        let model = self.model_for(options.model.as_deref());
        let timeout = options
            .timeout
            .unwrap_or_else(|| Duration::from_secs(self.config.timeouts.review_secs));

        let timestamp = file_timestamp();
        let log_dir = review_log_dir(&options, &self.config);
        let mut env = Vec::new();
        if let Some(settings) = self.agent.review_settings() {
            let path = log_dir.join(format!("review_{}.settings.json", timestamp));
            if let Err(e) = write_json_file(&path, &settings.contents).await {
                return failed(
                    format!("Failed to prepare review settings: {}", e),
                    String::new(),
                    String::new(),
                );
            }
            env.push((settings.env_var.to_string(), path.display().to_string()));
        }

        let mut metadata = InvocationMetadata::new(self.agent.agent_type(), &model);
        metadata.working_dir = options
            .working_dir
            .as_ref()
            .map(|dir| dir.display().to_string());

        log::info!(
            "[{}] Review with model {} ({} byte prompt), logs in {:?}",
            self.agent.display_name(),
            model,
            options.prompt.len(),
            log_dir
        );

        let mut spec = self.spawn_spec(
            &binary,
            self.agent.review_args(&model),
            options.working_dir.as_deref(),
            &options.prompt,
            timeout,
            Some(LogLayout::for_review(&log_dir, &timestamp)),
            metadata,
            None,
        );
        spec.env = env;
        let run = run_supervised(spec).await;

        let hard_failure = run.spawn_error.is_some()
            || run.timed_out
            || run.output_limit_exceeded
            || (run.exit_code != Some(0) && run.stdout.trim().is_empty());
        if hard_failure {
            let error = run
                .failure_message(timeout)
                .unwrap_or_else(|| "Agent produced no output".to_string());
            return failed(error, run.stdout, run.stderr);
        }

        let text = review_text(self.agent.agent_type(), &run);
        let Some(feedback) = extract_review_feedback(&text) else {
            return failed(
                "Could not extract a review verdict from agent output".to_string(),
                run.stdout,
                run.stderr,
            );
        };

        if feedback.missing_requirements.iter().any(|m| m == PARSE_FAILED_ISSUE) {
            log::warn!(
                "[{}] Review output was not valid JSON; reporting FAIL",
                self.agent.display_name()
            );
        }

        let mut error = run.failure_message(timeout);
        if let Some(path) = &options.output_file {
            if let Err(e) = write_json_file(path, &feedback).await {
                log::warn!("[{}] {}", self.agent.display_name(), e);
                error = Some(e);
            }
        }

        ReviewResult {
            success: true,
            feedback,
            stdout: run.stdout,
            stderr: run.stderr,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        }
    }
}
