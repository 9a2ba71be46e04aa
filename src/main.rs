use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ralph_engines_lib::agents::output_parser::summarize_tool_call;
use ralph_engines_lib::{
    create_engine, AgentType, EngineConfig, ReviewOptions, RunChatOptions, RunStreamOptions,
    StreamEventSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Ralph engines - drive AI coding agent CLIs through one contract
#[derive(Parser, Debug)]
#[command(name = "ralph-engines")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Agent CLI to drive
    #[arg(long, global = true, default_value = "claude")]
    agent: AgentType,

    /// Engine config file (defaults to ~/.ralph-ui/engines.yaml)
    #[arg(long, global = true, env = "RALPH_ENGINES_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether the agent CLI is installed
    Probe,

    /// Run one streamed task turn
    Stream {
        #[arg(long)]
        prompt_file: PathBuf,
        #[arg(long, default_value = ".")]
        working_dir: PathBuf,
        #[arg(long, default_value = ".ralph-ui/logs")]
        log_dir: PathBuf,
        #[arg(long, default_value_t = 1)]
        iteration: u32,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        skip_permissions: bool,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Send one chat message
    Chat {
        #[arg(long)]
        session_id: String,
        #[arg(long)]
        message: String,
        /// Mark this as the first message of the session
        #[arg(long)]
        first: bool,
        /// Document the conversation is about
        #[arg(long)]
        context_file: Option<PathBuf>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        working_dir: Option<PathBuf>,
    },

    /// Run a structured review of the prompt in a file
    Review {
        #[arg(long)]
        prompt_file: PathBuf,
        #[arg(long)]
        output_file: Option<PathBuf>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

/// Prints streamed events to stderr so stdout stays machine-readable
struct StderrSink;

impl StreamEventSink for StderrSink {
    fn on_text(&self, content: &str) {
        eprintln!("{}", content);
    }

    fn on_tool_call(&self, _id: &str, name: &str, input: &serde_json::Value) {
        eprintln!("-> {}", summarize_tool_call(name, input));
    }

    fn on_error(&self, message: &str) {
        eprintln!("!! {}", message);
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(EngineConfig::default_path);
    let config = EngineConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(run(cli, Arc::new(config)))
}

async fn run(cli: Cli, config: Arc<EngineConfig>) -> Result<()> {
    let engine = create_engine(cli.agent, config);

    let output = match cli.command {
        Commands::Probe => serde_json::to_value(engine.is_available().await)?,
        Commands::Stream {
            prompt_file,
            working_dir,
            log_dir,
            iteration,
            model,
            skip_permissions,
            timeout_secs,
        } => {
            let result = engine
                .run_stream(RunStreamOptions {
                    prompt_file,
                    working_dir,
                    log_dir,
                    iteration,
                    sink: Some(Arc::new(StderrSink)),
                    skip_permissions,
                    model,
                    timeout: timeout_secs.map(Duration::from_secs),
                })
                .await;
            serde_json::to_value(result)?
        }
        Commands::Chat {
            session_id,
            message,
            first,
            context_file,
            model,
            working_dir,
        } => {
            let spec_context = match context_file {
                Some(path) => Some(
                    tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("Failed to read {:?}", path))?,
                ),
                None => None,
            };
            let result = engine
                .run_chat(RunChatOptions {
                    session_id,
                    message,
                    is_first_message: first,
                    spec_context,
                    model,
                    working_dir,
                    sink: None,
                    timeout: None,
                })
                .await;
            serde_json::to_value(result)?
        }
        Commands::Review {
            prompt_file,
            output_file,
            model,
            timeout_secs,
        } => {
            let prompt = tokio::fs::read_to_string(&prompt_file)
                .await
                .with_context(|| format!("Failed to read {:?}", prompt_file))?;
            let result = engine
                .run_review(ReviewOptions {
                    prompt,
                    output_file,
                    model,
                    timeout: timeout_secs.map(Duration::from_secs),
                    working_dir: None,
                })
                .await;
            serde_json::to_value(result)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
