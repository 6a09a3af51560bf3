//! genpipe CLI Binary
//!
//! Runs a single generation through the full pipeline with the built-in echo
//! runner, printing SSE frames (streaming) or the aggregated JSON response.

use clap::{Parser, Subcommand};
use futures::StreamExt;
use genpipe::channel::backend_from_config;
use genpipe::config::{ConfigLoader, GenpipeConfig};
use genpipe::error::GenerationError;
use genpipe::logging::{init_logging, LoggingConfig};
use genpipe::orchestrator::{GenerateArgs, GenerationOrchestrator, OrchestratorSettings};
use genpipe::pipeline::PipelineOutput;
use genpipe::principal::SourcePrincipalResolver;
use genpipe::request::{
    AgentConfig, AgentStrategy, GenerationInputs, InvokeFrom, ModelConfig, OrchestrationConfig,
};
use genpipe::runner::{EchoRunner, RunnerSet};
use genpipe::store::MemoryGenerationStore;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "genpipe")]
#[command(about = "Generation task queue and streaming pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace root directory (for genpipe.toml)
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one generation with the echo runner
    Run {
        /// User query
        #[arg(long)]
        query: String,
        /// Stream frames instead of waiting for the full answer
        #[arg(long)]
        stream: bool,
        /// Run as an agent app (requires --stream)
        #[arg(long)]
        agent: bool,
        /// Invocation source: web_app, service_api, debugger, explore
        #[arg(long, default_value = "debugger")]
        invoke_from: String,
        /// Delay between streamed words in milliseconds
        #[arg(long, default_value = "0")]
        delay_ms: u64,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = init_logging(Some(&build_logging_config(&cli, &config))) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }
    info!("genpipe starting");

    let result = match cli.command {
        Commands::Run {
            query,
            stream,
            agent,
            invoke_from,
            delay_ms,
        } => run(&config, query, stream, agent, &invoke_from, delay_ms).await,
        Commands::Config => toml::to_string_pretty(&config)
            .map(|text| println!("{}", text))
            .map_err(|e| GenerationError::Config(e.to_string())),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<GenpipeConfig, GenerationError> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load(&cli.workspace)?,
    };
    config.validate().map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        GenerationError::Config(format!(
            "Configuration validation failed:\n{}",
            messages.join("\n")
        ))
    })?;
    Ok(config)
}

fn build_logging_config(cli: &Cli, config: &GenpipeConfig) -> LoggingConfig {
    if !cli.verbose {
        return LoggingConfig {
            enabled: false,
            ..LoggingConfig::default()
        };
    }
    let mut logging = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        logging.format = format.clone();
    }
    logging
}

fn parse_invoke_from(value: &str) -> Result<InvokeFrom, GenerationError> {
    match value {
        "web_app" => Ok(InvokeFrom::WebApp),
        "service_api" => Ok(InvokeFrom::ServiceApi),
        "debugger" => Ok(InvokeFrom::Debugger),
        "explore" => Ok(InvokeFrom::Explore),
        other => Err(GenerationError::InvalidRequest(format!(
            "Unknown invocation source: {}",
            other
        ))),
    }
}

async fn run(
    config: &GenpipeConfig,
    query: String,
    stream: bool,
    agent: bool,
    invoke_from: &str,
    delay_ms: u64,
) -> Result<(), GenerationError> {
    let invoke_from = parse_invoke_from(invoke_from)?;
    let backend = backend_from_config(&config.channel).await?;
    let echo = Arc::new(EchoRunner::new(Duration::from_millis(delay_ms)));
    let orchestrator = GenerationOrchestrator::new(
        OrchestratorSettings::from(config),
        backend,
        Arc::new(MemoryGenerationStore::new()),
        Arc::new(SourcePrincipalResolver),
        RunnerSet::new(echo.clone()).with_agent(echo),
    );

    let mut orchestration = OrchestrationConfig::new(ModelConfig {
        provider: "echo".to_string(),
        model: "echo-1".to_string(),
        mode: Some("chat".to_string()),
        parameters: BTreeMap::new(),
        stop: Vec::new(),
    });
    if agent {
        orchestration.agent = Some(AgentConfig {
            strategy: AgentStrategy::FunctionCalling,
            tools: Vec::new(),
            max_iteration: 5,
        });
    }

    let output = orchestrator
        .generate(GenerateArgs {
            tenant_id: "local".to_string(),
            app_id: "genpipe-cli".to_string(),
            principal_id: whoami(),
            invoke_from,
            inputs: GenerationInputs::with_query(query),
            orchestration,
            stream,
            conversation_id: None,
        })
        .await?;

    match output {
        PipelineOutput::Blocking(response) => {
            let text = serde_json::to_string_pretty(&response)
                .map_err(|e| GenerationError::Config(e.to_string()))?;
            println!("{}", text);
        }
        PipelineOutput::Streaming(mut frames) => {
            while let Some(frame) = frames.next().await {
                print!("{}", frame.to_sse());
            }
        }
    }
    Ok(())
}

fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "cli-user".to_string())
}
