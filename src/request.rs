//! Generation request entities.
//!
//! A [`GenerationDraft`] is assembled from the caller's arguments, handed to the
//! persistence collaborator to create the conversation/message records, and then
//! frozen into an immutable [`GenerationRequest`] that the worker, the watchdog and
//! the pipeline share read-only.

use crate::error::GenerationError;
use crate::types::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Origin of a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeFrom {
    WebApp,
    ServiceApi,
    Debugger,
    Explore,
}

impl InvokeFrom {
    /// Web app and service API callers are end users; everything else is a
    /// console account.
    pub fn is_end_user(self) -> bool {
        matches!(self, InvokeFrom::WebApp | InvokeFrom::ServiceApi)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvokeFrom::WebApp => "web_app",
            InvokeFrom::ServiceApi => "service_api",
            InvokeFrom::Debugger => "debugger",
            InvokeFrom::Explore => "explore",
        }
    }
}

impl fmt::Display for InvokeFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model selection for a generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    /// "chat" or "completion"
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "prompt_type", rename_all = "snake_case")]
pub enum PromptTemplate {
    Simple { template: String },
    Advanced { messages: Vec<PromptMessage> },
}

impl Default for PromptTemplate {
    fn default() -> Self {
        PromptTemplate::Simple {
            template: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStrategy {
    FunctionCalling,
    ChainOfThought,
}

/// Agent toggle. Presence of this section makes the generation an agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub strategy: AgentStrategy,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_max_iteration")]
    pub max_iteration: u32,
}

fn default_max_iteration() -> u32 {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieveStrategy {
    Single,
    Multiple,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub dataset_ids: Vec<String>,
    pub strategy: RetrieveStrategy,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub score_threshold: Option<f32>,
}

/// Fully resolved orchestration snapshot supplied by the configuration
/// collaborator. Treated as opaque apart from the runner toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub prompt_template: PromptTemplate,
    #[serde(default)]
    pub agent: Option<AgentConfig>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub retrieval: Option<RetrievalConfig>,
    #[serde(default)]
    pub opening_statement: Option<String>,
    #[serde(default)]
    pub show_retrieve_source: bool,
}

/// Which runner executes a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    Basic,
    Agent,
    Workflow,
}

impl RunnerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunnerKind::Basic => "basic",
            RunnerKind::Agent => "agent",
            RunnerKind::Workflow => "workflow",
        }
    }
}

impl OrchestrationConfig {
    pub fn new(model: ModelConfig) -> Self {
        Self {
            model,
            prompt_template: PromptTemplate::default(),
            agent: None,
            workflow_id: None,
            retrieval: None,
            opening_statement: None,
            show_retrieve_source: false,
        }
    }

    pub fn is_agent(&self) -> bool {
        self.agent.is_some()
    }

    /// Resolve the runner for this configuration.
    pub fn runner_kind(&self) -> Result<RunnerKind, GenerationError> {
        match (&self.agent, &self.workflow_id) {
            (Some(_), Some(_)) => Err(GenerationError::Config(
                "Agent mode cannot be combined with a workflow".to_string(),
            )),
            (Some(_), None) => Ok(RunnerKind::Agent),
            (None, Some(_)) => Ok(RunnerKind::Workflow),
            (None, None) => Ok(RunnerKind::Basic),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Image,
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMethod {
    RemoteUrl,
    LocalFile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub kind: FileKind,
    pub transfer_method: TransferMethod,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub upload_file_id: Option<String>,
}

/// User-supplied input payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationInputs {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub files: Vec<FileAttachment>,
}

impl GenerationInputs {
    pub fn with_query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    /// Strip NUL characters from the query.
    fn sanitized(mut self) -> Self {
        if let Some(query) = self.query.as_mut() {
            if query.contains('\0') {
                *query = query.replace('\0', "");
            }
        }
        self
    }
}

/// Identifiers of the book-keeping records created before a worker starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRecords {
    pub conversation_id: String,
    pub message_id: String,
}

/// Request as seen by the persistence collaborator, before records exist.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationDraft {
    pub task_id: TaskId,
    pub tenant_id: String,
    pub app_id: String,
    pub principal_id: String,
    pub invoke_from: InvokeFrom,
    pub inputs: GenerationInputs,
    pub orchestration: OrchestrationConfig,
    pub stream: bool,
    /// Existing conversation to continue, if any
    pub conversation_id: Option<String>,
}

impl GenerationDraft {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: impl Into<String>,
        app_id: impl Into<String>,
        principal_id: impl Into<String>,
        invoke_from: InvokeFrom,
        inputs: GenerationInputs,
        orchestration: OrchestrationConfig,
        stream: bool,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            task_id: TaskId::new(),
            tenant_id: tenant_id.into(),
            app_id: app_id.into(),
            principal_id: principal_id.into(),
            invoke_from,
            inputs: inputs.sanitized(),
            orchestration,
            stream,
            conversation_id,
        }
    }

    /// Freeze the draft once its records exist.
    pub fn finalize(self, records: GenerationRecords) -> GenerationRequest {
        GenerationRequest {
            task_id: self.task_id,
            tenant_id: self.tenant_id,
            app_id: self.app_id,
            principal_id: self.principal_id,
            invoke_from: self.invoke_from,
            inputs: self.inputs,
            orchestration: self.orchestration,
            stream: self.stream,
            records,
        }
    }
}

/// Immutable generation request, created once per `generate()` call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub task_id: TaskId,
    pub tenant_id: String,
    pub app_id: String,
    pub principal_id: String,
    pub invoke_from: InvokeFrom,
    pub inputs: GenerationInputs,
    pub orchestration: OrchestrationConfig,
    pub stream: bool,
    pub records: GenerationRecords,
}

impl GenerationRequest {
    pub fn conversation_id(&self) -> &str {
        &self.records.conversation_id
    }

    pub fn message_id(&self) -> &str {
        &self.records.message_id
    }

    pub fn query(&self) -> Option<&str> {
        self.inputs.query.as_deref()
    }
}
