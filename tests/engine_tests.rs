// Integration tests for the CLI engines
// Fake agent CLIs are shell scripts configured as the agent binary

#[cfg(all(test, unix))]
mod engine_integration_tests {
    use ralph_engines_lib::agents::path_resolver::FixedBinary;
    use ralph_engines_lib::agents::{AgentEngine, CliEngine, ClaudeProvider, GeminiProvider};
    use ralph_engines_lib::{
        ChatRole, EngineConfig, ReviewOptions, RunChatOptions, RunStreamOptions, Verdict,
    };
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_agent(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn test_config(temp: &TempDir) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.chat.sessions_dir = temp.path().join("sessions");
        config.retry.capacity_retry_delays_ms = vec![10, 20];
        config.logs.review_dir = temp.path().join("review-logs");
        config
    }

    /// Names of files in `dir` that start with `prefix` and end with `suffix`
    fn files_matching(dir: &Path, prefix: &str, suffix: &str) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(prefix) && name.ends_with(suffix))
            .collect()
    }

    fn stream_options(temp: &TempDir, prompt: &str) -> RunStreamOptions {
        let prompt_file = temp.path().join("PROMPT.md");
        std::fs::write(&prompt_file, prompt).unwrap();
        RunStreamOptions {
            prompt_file,
            working_dir: temp.path().to_path_buf(),
            log_dir: temp.path().join("logs"),
            iteration: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_probe_reports_version() {
        let temp = TempDir::new().unwrap();
        let binary = write_agent(
            temp.path(),
            "claude-wrapper",
            r#"if [ "$1" = "--version" ]; then echo "1.0.71 (Claude Code)"; exit 0; fi
exit 1"#,
        );

        let engine = CliEngine::new(ClaudeProvider::new(), Arc::new(test_config(&temp)))
            .with_resolver(Arc::new(FixedBinary::new(binary)));
        let availability = engine.is_available().await;

        assert!(availability.available);
        assert_eq!(availability.name, "Claude Code");
        assert_eq!(availability.version.as_deref(), Some("1.0.71"));
    }

    #[tokio::test]
    async fn test_stream_completes_and_writes_logs() {
        let temp = TempDir::new().unwrap();
        let args_log = temp.path().join("args.log");
        let mut config = test_config(&temp);
        config.agents.claude.binary = Some(write_agent(
            temp.path(),
            "claude",
            &format!(
                r#"echo "$@" > '{}'
cat > /dev/null
cat <<'EOF'
{{"type":"system","subtype":"init"}}
{{"type":"assistant","message":{{"content":[{{"type":"text","text":"Implemented the parser."}}]}}}}
{{"type":"assistant","message":{{"content":[{{"type":"text","text":"<promise>COMPLETE</promise>"}}]}}}}
{{"type":"result","subtype":"success","is_error":false,"result":"<promise>COMPLETE</promise>"}}
EOF"#,
                args_log.display()
            ),
        ));

        let engine = CliEngine::new(ClaudeProvider::new(), Arc::new(config));
        let mut options = stream_options(&temp, "Implement the parser");
        options.skip_permissions = true;
        let result = engine.run_stream(options).await;

        assert!(result.success, "stream failed: {:?}", result.error);
        assert!(result.is_complete);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.model, "sonnet");
        assert_eq!(
            result.output,
            "Implemented the parser.\n<promise>COMPLETE</promise>"
        );
        assert!(result.error.is_none());

        let args = std::fs::read_to_string(&args_log).unwrap();
        assert!(args.contains("--output-format stream-json"));
        assert!(args.contains("--model sonnet"));
        assert!(args.contains("--dangerously-skip-permissions"));

        assert_eq!(result.log_path, temp.path().join("logs/iteration_1.jsonl"));
        assert_eq!(std::fs::read_to_string(&result.log_path).unwrap().lines().count(), 4);
        let norm = std::fs::read_to_string(&result.norm_log_path).unwrap();
        let metadata: serde_json::Value =
            serde_json::from_str(norm.lines().next().unwrap()).unwrap();
        assert_eq!(metadata["type"], "metadata");
        assert_eq!(metadata["iteration"], 1);
        assert_eq!(metadata["model"], "sonnet");
    }

    #[tokio::test]
    async fn test_clean_exit_without_marker_is_not_complete() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(&temp);
        config.agents.gemini.binary = Some(write_agent(
            temp.path(),
            "gemini",
            r#"cat > /dev/null
echo '{"type":"message","role":"assistant","content":"Still working","delta":true}'"#,
        ));

        let engine = CliEngine::new(GeminiProvider::new(), Arc::new(config));
        let result = engine.run_stream(stream_options(&temp, "task")).await;

        assert!(result.success);
        assert!(!result.is_complete);
        assert_eq!(result.output, "Still working");
    }

    #[tokio::test]
    async fn test_capacity_errors_retry_then_fall_back() {
        let temp = TempDir::new().unwrap();
        let calls = temp.path().join("calls.log");
        let mut config = test_config(&temp);
        config.agents.gemini.default_model = "gemini-2.5-pro".to_string();
        config.agents.gemini.fallback_models = vec!["gemini-2.5-flash".to_string()];
        config.agents.gemini.binary = Some(write_agent(
            temp.path(),
            "gemini",
            &format!(
                r#"echo "$@" >> '{}'
cat > /dev/null
echo 'Error: RESOURCE_EXHAUSTED: No capacity available for model' >&2
exit 1"#,
                calls.display()
            ),
        ));

        let engine = CliEngine::new(GeminiProvider::new(), Arc::new(config));
        let result = engine.run_stream(stream_options(&temp, "task")).await;

        assert!(!result.success);
        assert_eq!(result.model, "gemini-2.5-flash");
        assert!(result.error.unwrap().contains("RESOURCE_EXHAUSTED"));

        let calls = std::fs::read_to_string(&calls).unwrap();
        let models: Vec<&str> = calls
            .lines()
            .map(|line| line.split("--model ").nth(1).unwrap().trim())
            .collect();
        assert_eq!(
            models,
            vec![
                "gemini-2.5-pro",
                "gemini-2.5-pro",
                "gemini-2.5-pro",
                "gemini-2.5-flash",
                "gemini-2.5-flash",
                "gemini-2.5-flash",
            ]
        );
    }

    #[tokio::test]
    async fn test_ordinary_failure_is_not_retried() {
        let temp = TempDir::new().unwrap();
        let calls = temp.path().join("calls.log");
        let mut config = test_config(&temp);
        config.agents.claude.binary = Some(write_agent(
            temp.path(),
            "claude",
            &format!(
                r#"echo call >> '{}'
cat > /dev/null
echo '{{"type":"assistant","message":{{"content":[{{"type":"text","text":"partial work"}}]}}}}'
echo 'Error: invalid API key' >&2
exit 2"#,
                calls.display()
            ),
        ));

        let engine = CliEngine::new(ClaudeProvider::new(), Arc::new(config));
        let result = engine.run_stream(stream_options(&temp, "task")).await;

        assert!(!result.success);
        assert!(!result.is_complete);
        assert_eq!(result.exit_code, Some(2));
        assert_eq!(result.output, "partial work");
        assert_eq!(
            result.error.as_deref(),
            Some("Agent exited with code 2: Error: invalid API key")
        );
        assert_eq!(std::fs::read_to_string(&calls).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn test_emulated_chat_replays_history() {
        let temp = TempDir::new().unwrap();
        let prompts = temp.path().join("prompts.log");
        let mut config = test_config(&temp);
        config.agents.gemini.binary = Some(write_agent(
            temp.path(),
            "gemini",
            &format!(
                r#"cat >> '{0}'
echo '<<<END>>>' >> '{0}'
echo 'Loaded cached credentials.'
echo '{{"type":"init","session_id":"abc"}}'
echo '{{"type":"message","role":"user","content":"echoed prompt"}}'
echo '{{"type":"message","role":"assistant","content":"Reply ","delta":true}}'
echo '{{"type":"message","role":"assistant","content":"text","delta":true}}'
echo '{{"type":"result","status":"success"}}'"#,
                prompts.display()
            ),
        ));
        let sessions_dir = config.chat.sessions_dir.clone();
        let engine = CliEngine::new(GeminiProvider::new(), Arc::new(config));

        let first = engine
            .run_chat(RunChatOptions {
                session_id: "session-1".to_string(),
                message: "What is Rust?".to_string(),
                is_first_message: true,
                spec_context: Some("# PRD\nBuild a CLI".to_string()),
                ..Default::default()
            })
            .await;
        assert!(first.is_success(), "chat failed: {:?}", first.error);
        assert_eq!(first.response, "Loaded cached credentials.\nReply text");

        let second = engine
            .run_chat(RunChatOptions {
                session_id: "session-1".to_string(),
                message: "And cargo?".to_string(),
                ..Default::default()
            })
            .await;
        assert!(second.is_success());

        let logged = std::fs::read_to_string(&prompts).unwrap();
        let turns: Vec<&str> = logged.split("<<<END>>>").collect();
        assert!(turns[0].contains("=== Document ===\n# PRD\nBuild a CLI"));
        assert!(turns[0].contains("User: What is Rust?"));
        assert!(!turns[1].contains("=== Document ==="));
        assert!(turns[1].contains("User: What is Rust?"));
        assert!(turns[1].contains("Assistant: Loaded cached credentials.\nReply text"));
        assert!(turns[1].contains("User: And cargo?"));

        let history: Vec<ralph_engines_lib::ChatHistoryEntry> = serde_json::from_str(
            &std::fs::read_to_string(sessions_dir.join("session-1/history.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[2].content, "And cargo?");
        assert_eq!(history[3].role, ChatRole::Assistant);
    }

    #[tokio::test]
    async fn test_failed_chat_turn_leaves_history_untouched() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(&temp);
        config.agents.gemini.binary = Some(write_agent(
            temp.path(),
            "gemini",
            "cat > /dev/null\necho 'quota check failed' >&2\nexit 1",
        ));
        let sessions_dir = config.chat.sessions_dir.clone();
        let engine = CliEngine::new(GeminiProvider::new(), Arc::new(config));

        let result = engine
            .run_chat(RunChatOptions {
                session_id: "session-2".to_string(),
                message: "hello".to_string(),
                is_first_message: true,
                ..Default::default()
            })
            .await;

        assert!(result.error.unwrap().contains("quota check failed"));
        assert!(!sessions_dir.join("session-2/history.json").exists());
    }

    #[tokio::test]
    async fn test_invalid_session_id_is_rejected() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(&temp);
        config.agents.gemini.binary = Some(write_agent(temp.path(), "gemini", "exit 0"));
        let engine = CliEngine::new(GeminiProvider::new(), Arc::new(config));

        let result = engine
            .run_chat(RunChatOptions {
                session_id: "../escape".to_string(),
                message: "hello".to_string(),
                ..Default::default()
            })
            .await;

        assert!(result.response.is_empty());
        assert!(result.error.unwrap().contains("Invalid session id"));
    }

    #[tokio::test]
    async fn test_native_chat_passes_session_flags() {
        let temp = TempDir::new().unwrap();
        let args_log = temp.path().join("args.log");
        let prompts = temp.path().join("prompts.log");
        let mut config = test_config(&temp);
        config.agents.claude.binary = Some(write_agent(
            temp.path(),
            "claude",
            &format!(
                r#"echo "$@" >> '{}'
cat >> '{}'
echo '{{"type":"assistant","message":{{"content":[{{"type":"text","text":"Sure."}}]}}}}'
echo '{{"type":"result","subtype":"success","is_error":false,"result":"Sure."}}'"#,
                args_log.display(),
                prompts.display()
            ),
        ));
        let engine = CliEngine::new(ClaudeProvider::new(), Arc::new(config));
        let session_id = "0b7c7f1e-4c1a-4a53-9d55-3f7f1c2a9e10";

        for (message, first) in [("Plan the work", true), ("Go on", false)] {
            let result = engine
                .run_chat(RunChatOptions {
                    session_id: session_id.to_string(),
                    message: message.to_string(),
                    is_first_message: first,
                    ..Default::default()
                })
                .await;
            assert_eq!(result.response, "Sure.");
            assert!(result.error.is_none());
        }

        let args = std::fs::read_to_string(&args_log).unwrap();
        let lines: Vec<&str> = args.lines().collect();
        assert!(lines[0].contains(&format!("--session-id {}", session_id)));
        assert!(lines[1].contains(&format!("--resume {}", session_id)));

        // Native turns send only the new message after the first
        let prompts = std::fs::read_to_string(&prompts).unwrap();
        assert!(prompts.ends_with("Go on"));
        assert!(!prompts.contains("=== Conversation History ==="));
    }

    #[tokio::test]
    async fn test_review_extracts_fenced_verdict() {
        let temp = TempDir::new().unwrap();
        let args_log = temp.path().join("args.log");
        let output_file = temp.path().join("review/feedback.json");
        let mut config = test_config(&temp);
        config.agents.claude.binary = Some(write_agent(
            temp.path(),
            "claude",
            &format!(
                r#"echo "$@" > '{}'
cat > /dev/null
cat <<'EOF'
{{"type":"result","subtype":"success","is_error":false,"result":"Review done.\n```json\n{{\"verdict\": \"PASS\", \"suggestions\": [\"add tests\"], \"contradictions\": [{{\"id\": \"C1\", \"issue\": \"two owners\"}}]}}\n```"}}
EOF"#,
                args_log.display()
            ),
        ));
        let engine = CliEngine::new(ClaudeProvider::new(), Arc::new(config));

        let result = engine
            .run_review(ReviewOptions {
                prompt: "Review this PRD".to_string(),
                output_file: Some(output_file.clone()),
                model: Some("opus".to_string()),
                ..Default::default()
            })
            .await;

        assert!(result.success, "review failed: {:?}", result.error);
        assert!(result.error.is_none());
        assert_eq!(result.feedback.verdict, Verdict::Pass);
        assert_eq!(result.feedback.suggestions, vec!["add tests".to_string()]);
        assert_eq!(result.feedback.contradictions, vec!["C1 - two owners".to_string()]);

        let args = std::fs::read_to_string(&args_log).unwrap();
        assert!(args.contains("--output-format json"));
        assert!(args.contains("--model opus"));
        assert!(args.contains("--tools= --max-turns 1"));

        let review_dir = temp.path().join("review");
        assert_eq!(files_matching(&review_dir, "review_", ".norm.jsonl").len(), 1);
        assert_eq!(files_matching(&review_dir, "review_", ".err").len(), 1);
        assert!(files_matching(&review_dir, "review_", ".settings.json").is_empty());

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output_file).unwrap()).unwrap();
        assert_eq!(written["verdict"], "PASS");
    }

    #[tokio::test]
    async fn test_review_unparseable_fail_text_is_synthesized() {
        let temp = TempDir::new().unwrap();
        let settings_copy = temp.path().join("settings-seen.json");
        let mut config = test_config(&temp);
        config.agents.gemini.binary = Some(write_agent(
            temp.path(),
            "gemini",
            &format!(
                r#"cat > /dev/null
cat "$GEMINI_CLI_SYSTEM_SETTINGS_PATH" > '{}'
echo 'Verdict: FAIL, the plan has gaps'"#,
                settings_copy.display()
            ),
        ));
        let engine = CliEngine::new(GeminiProvider::new(), Arc::new(config));

        let result = engine
            .run_review(ReviewOptions {
                prompt: "Review".to_string(),
                ..Default::default()
            })
            .await;

        assert!(result.success);
        assert_eq!(result.feedback.verdict, Verdict::Fail);
        assert_eq!(result.feedback.missing_requirements.len(), 1);

        // The review ran with an empty core-tool allowlist
        let seen: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&settings_copy).unwrap()).unwrap();
        assert_eq!(seen["tools"]["core"], serde_json::json!([]));

        let review_dir = temp.path().join("review-logs");
        assert_eq!(files_matching(&review_dir, "review_", ".settings.json").len(), 1);
        let raw_logs = files_matching(&review_dir, "review_", ".jsonl");
        assert_eq!(raw_logs.len(), 2);
    }

    #[tokio::test]
    async fn test_review_without_output_is_a_failure() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(&temp);
        config.agents.gemini.binary = Some(write_agent(
            temp.path(),
            "gemini",
            "cat > /dev/null\necho 'auth required' >&2\nexit 2",
        ));
        let engine = CliEngine::new(GeminiProvider::new(), Arc::new(config));

        let result = engine
            .run_review(ReviewOptions {
                prompt: "Review".to_string(),
                ..Default::default()
            })
            .await;

        assert!(!result.success);
        assert_eq!(result.feedback.verdict, Verdict::Fail);
        assert_eq!(result.stderr, "auth required\n");
        assert_eq!(
            result.error.as_deref(),
            Some("Agent exited with code 2: auth required")
        );
    }
}
