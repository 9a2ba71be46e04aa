//! Engine configuration
//!
//! Reads `engines.yaml` (default `~/.ralph-ui/engines.yaml`). Every section is
//! optional; missing fields fall back to the defaults below. The loaded config
//! is immutable and handed to engines, the retry controller and the
//! normalizer at construction time.

use crate::error::{EngineError, EngineResult};
use crate::models::AgentType;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub limits: LimitsConfig,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
    pub completion: CompletionConfig,
    pub chat: ChatConfig,
    pub logs: LogsConfig,
    pub agents: AgentsConfig,
}

/// Output ceilings and termination grace window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitsConfig {
    /// Maximum stdout bytes kept before the agent is terminated (default: 10 MiB)
    pub stdout_max_bytes: usize,
    /// Maximum stderr bytes kept (default: 1 MiB)
    pub stderr_max_bytes: usize,
    /// Time between the graceful terminate signal and a forced kill (default: 5s)
    pub kill_grace_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            stdout_max_bytes: 10 * 1024 * 1024,
            stderr_max_bytes: 1024 * 1024,
            kill_grace_ms: 5000,
        }
    }
}

impl LimitsConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Wall-clock timeouts per call kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutConfig {
    pub stream_secs: u64,
    pub review_secs: u64,
    pub chat_secs: u64,
    pub version_probe_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            stream_secs: 300,
            review_secs: 300,
            chat_secs: 1200,
            version_probe_secs: 10,
        }
    }
}

/// Capacity retry settings shared by all agents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Backoff before each same-model retry; its length is the retry budget
    pub capacity_retry_delays_ms: Vec<u64>,
    /// Substrings (case-insensitive) in stderr that identify a capacity error
    pub capacity_patterns: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            capacity_retry_delays_ms: vec![1000, 2000, 4000],
            capacity_patterns: vec![
                "RESOURCE_EXHAUSTED".to_string(),
                "MODEL_CAPACITY_EXHAUSTED".to_string(),
                "No capacity available".to_string(),
                "exhausted your capacity".to_string(),
                "overloaded_error".to_string(),
                "Overloaded".to_string(),
                "status 429".to_string(),
                "Too Many Requests".to_string(),
            ],
        }
    }
}

impl RetryConfig {
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.capacity_retry_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

/// Semantic completion marker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionConfig {
    pub marker: String,
    /// Only the last N lines of output are searched for the marker
    pub max_lines_from_end: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            marker: "<promise>COMPLETE</promise>".to_string(),
            max_lines_from_end: 50,
        }
    }
}

/// Chat session persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    pub max_history_entries: usize,
    pub sessions_dir: PathBuf,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_history_entries: 100,
            sessions_dir: global_config_dir().join("chat-sessions"),
        }
    }
}

/// Invocation logs that belong to no task or session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogsConfig {
    /// `review_<ts>.*` logs for reviews without an output file
    pub review_dir: PathBuf,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            review_dir: global_config_dir().join("review-logs"),
        }
    }
}

/// Per-agent settings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    /// Explicit binary path; when absent the CLI is resolved from PATH
    pub binary: Option<PathBuf>,
    pub default_model: String,
    /// Ordered fallback models tried once the capacity retry budget is spent
    pub fallback_models: Vec<String>,
}

impl AgentSettings {
    /// Built-in settings for one agent
    pub fn builtin(agent_type: AgentType) -> Self {
        match agent_type {
            AgentType::Claude => Self {
                binary: None,
                default_model: "sonnet".to_string(),
                fallback_models: vec!["haiku".to_string()],
            },
            AgentType::Gemini => Self {
                binary: None,
                default_model: "gemini-2.5-pro".to_string(),
                fallback_models: vec![
                    "gemini-2.5-flash".to_string(),
                    "gemini-2.5-flash-lite".to_string(),
                ],
            },
        }
    }
}

/// Agent settings as written in the file; absent fields keep the built-in value
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AgentSettingsOverlay {
    binary: Option<PathBuf>,
    default_model: Option<String>,
    fallback_models: Option<Vec<String>>,
}

impl AgentSettingsOverlay {
    fn apply(self, agent_type: AgentType) -> AgentSettings {
        let builtin = AgentSettings::builtin(agent_type);
        AgentSettings {
            binary: self.binary.or(builtin.binary),
            default_model: self.default_model.unwrap_or(builtin.default_model),
            fallback_models: self.fallback_models.unwrap_or(builtin.fallback_models),
        }
    }
}

fn claude_settings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AgentSettings, D::Error> {
    AgentSettingsOverlay::deserialize(deserializer).map(|o| o.apply(AgentType::Claude))
}

fn gemini_settings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AgentSettings, D::Error> {
    AgentSettingsOverlay::deserialize(deserializer).map(|o| o.apply(AgentType::Gemini))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsConfig {
    #[serde(deserialize_with = "claude_settings")]
    pub claude: AgentSettings,
    #[serde(deserialize_with = "gemini_settings")]
    pub gemini: AgentSettings,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            claude: AgentSettings::builtin(AgentType::Claude),
            gemini: AgentSettings::builtin(AgentType::Gemini),
        }
    }
}

impl AgentsConfig {
    pub fn for_agent(&self, agent_type: AgentType) -> &AgentSettings {
        match agent_type {
            AgentType::Claude => &self.claude,
            AgentType::Gemini => &self.gemini,
        }
    }
}

impl EngineConfig {
    /// Settings for one agent type
    pub fn agent(&self, agent_type: AgentType) -> &AgentSettings {
        self.agents.for_agent(agent_type)
    }

    /// Default config path (`~/.ralph-ui/engines.yaml`)
    pub fn default_path() -> PathBuf {
        global_config_dir().join("engines.yaml")
    }

    /// Read config from file, returning defaults if not found
    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            log::debug!("[Config] No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;

        serde_yaml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse {:?}: {}", path, e)))
    }

    /// Write config to file
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        crate::file_storage::atomic_write(path, &content)
    }
}

/// Get the global .ralph-ui directory in user home
pub fn global_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ralph-ui")
}
