//! App runners and their execution context.
//!
//! A runner performs the actual model invocation for one generation and
//! reports progress through the [`RunContext`]. The worker owns the terminal
//! event: runners return the end-of-message payload (or a [`RunError`]) and
//! never publish `message_end`, `error` or `stop` themselves.

use crate::channel::Subscription;
use crate::error::{ChannelError, GenerationError};
use crate::event::{
    AgentThoughtPayload, ChainPayload, ErrorCode, ErrorPayload, EventPayload, MessageEndPayload,
    MessageMetadata, PublishFrom, Usage,
};
use crate::request::{GenerationRequest, RunnerKind};
use crate::store::GenerationStore;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Fixed user-facing message for authorization failures.
pub const AUTHORIZATION_MESSAGE: &str = "Incorrect API key provided";
/// Fixed user-facing message for exhausted provider quota.
pub const QUOTA_MESSAGE: &str =
    "Your quota for the model provider has been exhausted. Please check your plan or credentials.";
/// Fixed user-facing message for unclassified failures.
pub const INTERNAL_MESSAGE: &str = "Internal Server Error, please contact support.";

/// Runner failure categories.
#[derive(Debug, Error)]
pub enum RunError {
    /// Cooperative stop; not a failure
    #[error("Generation stopped")]
    Stopped,

    #[error("Invoke authorization failed: {0}")]
    Authorization(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Invoke(String),

    #[error("Provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("{0}")]
    ProviderNotInitialized(String),

    #[error("{0}")]
    ModelNotSupported(String),

    #[error("Channel error: {0}")]
    Channel(ChannelError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RunError {
    /// User-safe error payload, or `None` for a cooperative stop.
    ///
    /// Authorization and quota failures carry fixed messages; internal detail
    /// never reaches the consumer for unclassified errors.
    pub fn to_payload(&self) -> Option<ErrorPayload> {
        let payload = match self {
            RunError::Stopped => return None,
            RunError::Authorization(_) => {
                ErrorPayload::new(ErrorCode::InvokeAuthorizationError, AUTHORIZATION_MESSAGE)
            }
            RunError::Validation(message) => ErrorPayload::new(ErrorCode::InvalidParam, message),
            RunError::Invoke(message) => {
                ErrorPayload::new(ErrorCode::CompletionRequestError, message)
            }
            RunError::QuotaExceeded(_) => {
                ErrorPayload::new(ErrorCode::ProviderQuotaExceeded, QUOTA_MESSAGE)
            }
            RunError::ProviderNotInitialized(message) => {
                ErrorPayload::new(ErrorCode::ProviderNotInitialize, message)
            }
            RunError::ModelNotSupported(message) => {
                ErrorPayload::new(ErrorCode::ModelCurrentlyNotSupport, message)
            }
            RunError::Channel(_) | RunError::Other(_) => {
                ErrorPayload::new(ErrorCode::InternalServerError, INTERNAL_MESSAGE)
            }
        };
        Some(payload)
    }

    /// Whether this error is unexpected and should be logged with full detail.
    pub fn is_unclassified(&self) -> bool {
        matches!(self, RunError::Channel(_) | RunError::Other(_))
    }
}

impl From<ChannelError> for RunError {
    fn from(err: ChannelError) -> Self {
        match err {
            // The consumer is gone or the task already ended: stop quietly.
            ChannelError::Closed(_) | ChannelError::Terminated(_) => RunError::Stopped,
            other => RunError::Channel(other),
        }
    }
}

impl From<GenerationError> for RunError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Stopped => RunError::Stopped,
            GenerationError::InvalidRequest(message) => RunError::Validation(message),
            GenerationError::Channel(e) => e.into(),
            other => RunError::Other(anyhow::anyhow!(other)),
        }
    }
}

/// Everything a runner may touch while executing one generation.
pub struct RunContext {
    request: Arc<GenerationRequest>,
    channel: Subscription,
    cancel: CancellationToken,
    store: Arc<dyn GenerationStore>,
}

impl RunContext {
    pub fn new(
        request: Arc<GenerationRequest>,
        channel: Subscription,
        cancel: CancellationToken,
        store: Arc<dyn GenerationStore>,
    ) -> Self {
        Self {
            request,
            channel,
            cancel,
            store,
        }
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Suspension point: returns [`RunError::Stopped`] once a stop was requested.
    pub fn checkpoint(&self) -> Result<(), RunError> {
        if self.cancel.is_cancelled() {
            return Err(RunError::Stopped);
        }
        Ok(())
    }

    pub(crate) fn channel(&self) -> &Subscription {
        &self.channel
    }

    async fn publish(&self, payload: EventPayload) -> Result<(), RunError> {
        self.checkpoint()?;
        self.channel
            .publish(payload, PublishFrom::ApplicationManager)
            .await?;
        Ok(())
    }

    /// Publish a text delta and persist it.
    pub async fn publish_message(&self, text: &str) -> Result<(), RunError> {
        self.publish(EventPayload::message(text)).await?;
        self.store
            .append_incremental_content(self.request.message_id(), text)
            .await?;
        Ok(())
    }

    /// Replace everything streamed so far (moderation output, for example).
    pub async fn publish_replace(&self, text: &str) -> Result<(), RunError> {
        self.publish(EventPayload::message_replace(text)).await?;
        self.store
            .replace_content(self.request.message_id(), text)
            .await?;
        Ok(())
    }

    pub async fn publish_chain(&self, step: &str, data: Value) -> Result<(), RunError> {
        self.publish(EventPayload::Chain(ChainPayload {
            step: step.to_string(),
            data,
        }))
        .await
    }

    pub async fn publish_agent_thought(&self, thought: AgentThoughtPayload) -> Result<(), RunError> {
        self.publish(EventPayload::AgentThought(thought)).await
    }
}

/// Executes one generation.
#[async_trait]
pub trait AppRunner: Send + Sync {
    async fn run(&self, ctx: &RunContext) -> Result<MessageEndPayload, RunError>;
}

/// Runners available to the orchestrator, keyed by [`RunnerKind`].
#[derive(Clone)]
pub struct RunnerSet {
    basic: Arc<dyn AppRunner>,
    agent: Option<Arc<dyn AppRunner>>,
    workflow: Option<Arc<dyn AppRunner>>,
}

impl RunnerSet {
    pub fn new(basic: Arc<dyn AppRunner>) -> Self {
        Self {
            basic,
            agent: None,
            workflow: None,
        }
    }

    pub fn with_agent(mut self, runner: Arc<dyn AppRunner>) -> Self {
        self.agent = Some(runner);
        self
    }

    pub fn with_workflow(mut self, runner: Arc<dyn AppRunner>) -> Self {
        self.workflow = Some(runner);
        self
    }

    pub fn select(&self, kind: RunnerKind) -> Result<Arc<dyn AppRunner>, GenerationError> {
        let runner = match kind {
            RunnerKind::Basic => Some(&self.basic),
            RunnerKind::Agent => self.agent.as_ref(),
            RunnerKind::Workflow => self.workflow.as_ref(),
        };
        runner.cloned().ok_or_else(|| {
            GenerationError::Config(format!("No {} runner configured", kind.as_str()))
        })
    }
}

/// Runner that streams the query back word by word.
///
/// Agent requests first emit a single `agent_thought`. Used by the `genpipe`
/// binary and the tests.
#[derive(Debug, Clone, Default)]
pub struct EchoRunner {
    chunk_delay: Duration,
}

impl EchoRunner {
    pub fn new(chunk_delay: Duration) -> Self {
        Self { chunk_delay }
    }
}

#[async_trait]
impl AppRunner for EchoRunner {
    async fn run(&self, ctx: &RunContext) -> Result<MessageEndPayload, RunError> {
        let query = ctx
            .request()
            .query()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| RunError::Validation("query is required".to_string()))?
            .to_string();

        if ctx.request().orchestration.is_agent() {
            ctx.publish_agent_thought(AgentThoughtPayload {
                id: uuid::Uuid::new_v4().to_string(),
                position: 1,
                thought: format!("Echoing {} characters", query.chars().count()),
                tool: None,
                tool_input: None,
                observation: None,
            })
            .await?;
        }

        let words: Vec<&str> = query.split_whitespace().collect();
        for (index, word) in words.iter().enumerate() {
            ctx.checkpoint()?;
            let chunk = if index == 0 {
                word.to_string()
            } else {
                format!(" {}", word)
            };
            ctx.publish_message(&chunk).await?;
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }

        let tokens = words.len() as u32;
        Ok(MessageEndPayload {
            answer: None,
            metadata: MessageMetadata {
                usage: Some(Usage {
                    prompt_tokens: tokens,
                    completion_tokens: tokens,
                    total_tokens: tokens * 2,
                    ..Usage::default()
                }),
                retriever_resources: Vec::new(),
            },
        })
    }
}
