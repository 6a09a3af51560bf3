//! Generation entry point.
//!
//! `generate()` validates the request, creates its records, subscribes the
//! task's channel, launches the worker and its watchdog as background tasks,
//! and hands the channel to a [`TaskPipeline`]. Worker concurrency is bounded
//! by a semaphore sized from `workers.max_concurrent`.

use crate::channel::ChannelBackend;
use crate::config::GenpipeConfig;
use crate::error::{ChannelError, GenerationError};
use crate::event::{EventPayload, PublishFrom, StopReason};
use crate::pipeline::{PipelineOutput, TaskPipeline};
use crate::principal::PrincipalResolver;
use crate::registry::{TaskHandle, TaskRegistry};
use crate::request::{GenerationDraft, GenerationInputs, InvokeFrom, OrchestrationConfig};
use crate::runner::{RunContext, RunnerSet};
use crate::store::GenerationStore;
use crate::types::TaskId;
use crate::watchdog::{Watchdog, WatchdogSettings};
use crate::worker::{Worker, WorkerSignal};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What `generate()` returns: an aggregated response or a frame stream.
pub type GenerateResponse = PipelineOutput;

/// Arguments of one `generate()` call
#[derive(Debug, Clone)]
pub struct GenerateArgs {
    pub tenant_id: String,
    pub app_id: String,
    pub principal_id: String,
    pub invoke_from: InvokeFrom,
    pub inputs: GenerationInputs,
    pub orchestration: OrchestrationConfig,
    pub stream: bool,
    /// Continue an existing conversation
    pub conversation_id: Option<String>,
}

/// Runtime knobs taken from [`GenpipeConfig`]
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub watchdog: WatchdogSettings,
    pub receive_timeout: Duration,
    pub max_concurrent: usize,
}

impl From<&GenpipeConfig> for OrchestratorSettings {
    fn from(config: &GenpipeConfig) -> Self {
        Self {
            watchdog: config.watchdog.settings(),
            receive_timeout: config.channel.receive_timeout(),
            max_concurrent: config.workers.max_concurrent,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&GenpipeConfig::default())
    }
}

pub struct GenerationOrchestrator {
    settings: OrchestratorSettings,
    backend: Arc<dyn ChannelBackend>,
    store: Arc<dyn GenerationStore>,
    principals: Arc<dyn PrincipalResolver>,
    runners: RunnerSet,
    registry: Arc<TaskRegistry>,
    permits: Arc<Semaphore>,
}

impl GenerationOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        backend: Arc<dyn ChannelBackend>,
        store: Arc<dyn GenerationStore>,
        principals: Arc<dyn PrincipalResolver>,
        runners: RunnerSet,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            settings,
            backend,
            store,
            principals,
            runners,
            registry: Arc::new(TaskRegistry::new()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn running_tasks(&self) -> usize {
        self.registry.len()
    }

    /// Start a generation and return its consumer output.
    ///
    /// Configuration problems (agent in blocking mode, agent combined with a
    /// workflow, no runner for the requested kind) fail here, before any
    /// channel is subscribed or any worker started.
    pub async fn generate(&self, args: GenerateArgs) -> Result<GenerateResponse, GenerationError> {
        let kind = args.orchestration.runner_kind()?;
        if args.orchestration.is_agent() && !args.stream {
            return Err(GenerationError::Config(
                "Agent app is not supported in blocking mode.".to_string(),
            ));
        }
        let runner = self.runners.select(kind)?;

        let draft = GenerationDraft::new(
            args.tenant_id,
            args.app_id,
            args.principal_id,
            args.invoke_from,
            args.inputs,
            args.orchestration,
            args.stream,
            args.conversation_id,
        );
        let records = self.store.create_generation_records(&draft).await?;
        let request = Arc::new(draft.finalize(records));
        let task_id = request.task_id.clone();

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GenerationError::Config("Worker pool is shut down".to_string()))?;

        let channel = self.backend.subscribe(&task_id).await?;
        let cancel = CancellationToken::new();
        if let Err(e) = self.registry.register(TaskHandle::new(
            task_id.clone(),
            request.invoke_from,
            request.principal_id.clone(),
            cancel.clone(),
            channel.clone(),
        )) {
            channel.unsubscribe();
            return Err(e);
        }

        info!(
            task_id = %task_id,
            runner = kind.as_str(),
            invoke_from = %request.invoke_from,
            stream = request.stream,
            "Generation started"
        );

        let signal = WorkerSignal::new();
        let worker = Worker::new(runner, self.store.clone());
        let ctx = RunContext::new(
            request.clone(),
            channel.clone(),
            cancel.clone(),
            self.store.clone(),
        );
        let registry = self.registry.clone();
        let done = signal.guard();
        tokio::spawn(async move {
            let _permit = permit;
            let _done = done;
            let outcome = worker.run(ctx).await;
            registry.remove(&task_id);
            debug!(task_id = %task_id, outcome = ?outcome, "Worker task exiting");
        });

        let watchdog = Watchdog::new(
            request.clone(),
            channel.clone(),
            cancel.clone(),
            self.principals.clone(),
            self.settings.watchdog,
        );
        tokio::spawn(watchdog.supervise(signal));

        TaskPipeline::new(request, channel, cancel, self.settings.receive_timeout)
            .process()
            .await
    }

    /// Stop a running task on behalf of its owner.
    pub async fn stop(
        &self,
        task_id: &TaskId,
        invoke_from: InvokeFrom,
        principal_id: &str,
    ) -> Result<(), GenerationError> {
        let handle = self
            .registry
            .authorize_stop(task_id, invoke_from, principal_id)?;

        handle.cancel.cancel();
        let publish = handle.channel.publish(
            EventPayload::stop(StopReason::UserRequested),
            PublishFrom::ApplicationManager,
        );
        // The queue stays full while the consumer is not pulling.
        match tokio::time::timeout(self.settings.watchdog.heartbeat_interval, publish).await {
            Ok(Ok(_)) | Ok(Err(ChannelError::Terminated(_))) | Ok(Err(ChannelError::Closed(_))) => {}
            Ok(Err(e)) => {
                warn!(task_id = %task_id, error = %e, "Failed to publish stop event");
            }
            Err(_) => {
                warn!(task_id = %task_id, "Channel full, stop event not delivered");
            }
        }
        info!(task_id = %task_id, principal_id, "Stop requested");
        Ok(())
    }
}
