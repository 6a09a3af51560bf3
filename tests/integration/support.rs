//! Shared helpers for integration tests
//!
//! Scripted runners, orchestrator wiring with in-memory collaborators, and an
//! environment guard for configuration tests.

use async_trait::async_trait;
use futures::StreamExt;
use genpipe::channel::LocalBackend;
use genpipe::event::{AgentThoughtPayload, MessageEndPayload};
use genpipe::orchestrator::{GenerateArgs, GenerationOrchestrator, OrchestratorSettings};
use genpipe::pipeline::{Frame, FrameStream};
use genpipe::principal::SourcePrincipalResolver;
use genpipe::request::{
    AgentConfig, AgentStrategy, GenerationInputs, InvokeFrom, ModelConfig, OrchestrationConfig,
};
use genpipe::runner::{AppRunner, RunContext, RunError, RunnerSet};
use genpipe::store::MemoryGenerationStore;
use genpipe::watchdog::WatchdogSettings;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// One step of a [`ScriptedRunner`]
#[derive(Clone)]
pub enum Step {
    Message(&'static str),
    Replace(&'static str),
    Thought(&'static str),
    Chain(&'static str),
    Sleep(Duration),
    Fail(fn() -> RunError),
    Panic,
}

/// Runner replaying a fixed script, checking for stops between steps.
pub struct ScriptedRunner {
    steps: Vec<Step>,
    end: MessageEndPayload,
}

impl ScriptedRunner {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            end: MessageEndPayload::default(),
        }
    }

    pub fn ending_with(mut self, end: MessageEndPayload) -> Self {
        self.end = end;
        self
    }
}

#[async_trait]
impl AppRunner for ScriptedRunner {
    async fn run(&self, ctx: &RunContext) -> Result<MessageEndPayload, RunError> {
        for (position, step) in self.steps.iter().enumerate() {
            ctx.checkpoint()?;
            match step {
                Step::Message(text) => ctx.publish_message(text).await?,
                Step::Replace(text) => ctx.publish_replace(text).await?,
                Step::Thought(thought) => {
                    ctx.publish_agent_thought(AgentThoughtPayload {
                        id: format!("thought-{}", position),
                        position: position as u32 + 1,
                        thought: thought.to_string(),
                        tool: None,
                        tool_input: None,
                        observation: None,
                    })
                    .await?
                }
                Step::Chain(name) => {
                    ctx.publish_chain(name, serde_json::json!({ "position": position }))
                        .await?
                }
                Step::Sleep(duration) => {
                    tokio::select! {
                        _ = ctx.cancellation().cancelled() => return Err(RunError::Stopped),
                        _ = tokio::time::sleep(*duration) => {}
                    }
                }
                Step::Fail(make) => return Err(make()),
                Step::Panic => panic!("scripted panic"),
            }
        }
        Ok(self.end.clone())
    }
}

pub fn model() -> ModelConfig {
    ModelConfig {
        provider: "openai".to_string(),
        model: "gpt-4".to_string(),
        mode: Some("chat".to_string()),
        parameters: BTreeMap::new(),
        stop: Vec::new(),
    }
}

pub fn agent_orchestration() -> OrchestrationConfig {
    let mut orchestration = OrchestrationConfig::new(model());
    orchestration.agent = Some(AgentConfig {
        strategy: AgentStrategy::ChainOfThought,
        tools: vec!["web_search".to_string()],
        max_iteration: 3,
    });
    orchestration
}

pub fn args(query: &str, stream: bool) -> GenerateArgs {
    GenerateArgs {
        tenant_id: "tenant-1".to_string(),
        app_id: "app-1".to_string(),
        principal_id: "user-1".to_string(),
        invoke_from: InvokeFrom::WebApp,
        inputs: GenerationInputs::with_query(query),
        orchestration: OrchestrationConfig::new(model()),
        stream,
        conversation_id: None,
    }
}

pub fn settings(lifetime: Duration, heartbeat: Duration) -> OrchestratorSettings {
    OrchestratorSettings {
        watchdog: WatchdogSettings {
            max_lifetime: lifetime,
            heartbeat_interval: heartbeat,
        },
        receive_timeout: Duration::from_secs(30),
        max_concurrent: 8,
    }
}

/// Orchestrator wired to in-process collaborators
pub struct Harness {
    pub orchestrator: GenerationOrchestrator,
    pub backend: Arc<LocalBackend>,
    pub store: Arc<MemoryGenerationStore>,
}

pub fn harness(runner: impl AppRunner + 'static) -> Harness {
    harness_with(
        OrchestratorSettings::default(),
        RunnerSet::new(Arc::new(runner)),
    )
}

pub fn harness_with(settings: OrchestratorSettings, runners: RunnerSet) -> Harness {
    harness_with_capacity(settings, runners, 64)
}

pub fn harness_with_capacity(
    settings: OrchestratorSettings,
    runners: RunnerSet,
    capacity: usize,
) -> Harness {
    let backend = Arc::new(LocalBackend::new(capacity));
    let store = Arc::new(MemoryGenerationStore::new());
    let orchestrator = GenerationOrchestrator::new(
        settings,
        backend.clone(),
        store.clone(),
        Arc::new(SourcePrincipalResolver),
        runners,
    );
    Harness {
        orchestrator,
        backend,
        store,
    }
}

pub async fn collect_frames(stream: FrameStream) -> Vec<Frame> {
    stream.collect().await
}

/// Wait (in virtual or real time) until no task is running.
pub async fn wait_until_idle(orchestrator: &GenerationOrchestrator) {
    for _ in 0..1_000 {
        if orchestrator.running_tasks() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("tasks still running: {}", orchestrator.running_tasks());
}

static ENV_MUTEX: Mutex<()> = Mutex::new(());

const ENV_KEYS: &[&str] = &[
    "HOME",
    "XDG_CONFIG_HOME",
    "GENPIPE__CHANNEL__CAPACITY",
    "GENPIPE__WATCHDOG__HEARTBEAT_INTERVAL_MS",
];

/// Run `f` with HOME and XDG_CONFIG_HOME pointing into `test_dir`, restoring
/// the previous environment afterwards.
pub fn with_config_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let saved: Vec<(&str, Option<String>)> = ENV_KEYS
        .iter()
        .map(|key| (*key, std::env::var(key).ok()))
        .collect();

    let home = test_dir.path().join("home");
    let config_home = test_dir.path().join("xdg");
    std::fs::create_dir_all(&home).unwrap();
    std::fs::create_dir_all(&config_home).unwrap();
    std::env::set_var("HOME", &home);
    std::env::set_var("XDG_CONFIG_HOME", &config_home);
    std::env::remove_var("GENPIPE__CHANNEL__CAPACITY");
    std::env::remove_var("GENPIPE__WATCHDOG__HEARTBEAT_INTERVAL_MS");

    let result = f();

    for (key, value) in saved {
        match value {
            Some(value) => std::env::set_var(key, value),
            None => std::env::remove_var(key),
        }
    }
    result
}
