//! Event schema for generation tasks.
//!
//! Every unit of progress a worker (or the watchdog) reports travels as an
//! [`Event`]: a sequenced envelope around a kind-specific [`EventPayload`].

use crate::types::TaskId;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Who published an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishFrom {
    ApplicationManager,
    TaskPipeline,
    Watchdog,
}

/// Discriminant of [`EventPayload`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    MessageReplace,
    Chain,
    AgentThought,
    MessageEnd,
    Error,
    Ping,
    Stop,
}

impl EventKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::MessageEnd | EventKind::Error | EventKind::Stop)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::MessageReplace => "message_replace",
            EventKind::Chain => "chain",
            EventKind::AgentThought => "agent_thought",
            EventKind::MessageEnd => "message_end",
            EventKind::Error => "error",
            EventKind::Ping => "ping",
            EventKind::Stop => "stop",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub text: String,
}

/// One reasoning/chain step (retrieval, tool routing, annotation reply, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainPayload {
    pub step: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentThoughtPayload {
    pub id: String,
    pub position: u32,
    #[serde(default)]
    pub thought: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default)]
    pub total_price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub latency_ms: u64,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieverResource {
    pub dataset_id: String,
    pub document_id: String,
    #[serde(default)]
    pub score: Option<f32>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retriever_resources: Vec<RetrieverResource>,
}

/// Terminal success payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageEndPayload {
    /// Final answer; when present and non-empty it supersedes the streamed deltas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

/// Stable, user-safe error codes carried by `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvokeAuthorizationError,
    InvalidParam,
    CompletionRequestError,
    ProviderQuotaExceeded,
    ProviderNotInitialize,
    ModelCurrentlyNotSupport,
    InternalServerError,
}

impl ErrorCode {
    pub fn status(self) -> u16 {
        match self {
            ErrorCode::InvokeAuthorizationError => 401,
            ErrorCode::InternalServerError => 500,
            _ => 400,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvokeAuthorizationError => "invoke_authorization_error",
            ErrorCode::InvalidParam => "invalid_param",
            ErrorCode::CompletionRequestError => "completion_request_error",
            ErrorCode::ProviderQuotaExceeded => "provider_quota_exceeded",
            ErrorCode::ProviderNotInitialize => "provider_not_initialize",
            ErrorCode::ModelCurrentlyNotSupport => "model_currently_not_support",
            ErrorCode::InternalServerError => "internal_server_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub status: u16,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status: code.status(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    UserRequested,
    Timeout,
    ClientDisconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopPayload {
    pub reason: StopReason,
}

/// Kind-specific event body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Message(MessagePayload),
    MessageReplace(MessagePayload),
    Chain(ChainPayload),
    AgentThought(AgentThoughtPayload),
    MessageEnd(MessageEndPayload),
    Error(ErrorPayload),
    Ping(PingPayload),
    Stop(StopPayload),
}

impl EventPayload {
    pub fn message(text: impl Into<String>) -> Self {
        EventPayload::Message(MessagePayload { text: text.into() })
    }

    pub fn message_replace(text: impl Into<String>) -> Self {
        EventPayload::MessageReplace(MessagePayload { text: text.into() })
    }

    pub fn stop(reason: StopReason) -> Self {
        EventPayload::Stop(StopPayload { reason })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Message(_) => EventKind::Message,
            EventPayload::MessageReplace(_) => EventKind::MessageReplace,
            EventPayload::Chain(_) => EventKind::Chain,
            EventPayload::AgentThought(_) => EventKind::AgentThought,
            EventPayload::MessageEnd(_) => EventKind::MessageEnd,
            EventPayload::Error(_) => EventKind::Error,
            EventPayload::Ping(_) => EventKind::Ping,
            EventPayload::Stop(_) => EventKind::Stop,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }
}

/// Sequenced event envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub task_id: TaskId,
    pub seq: u64,
    pub ts: String,
    pub source: PublishFrom,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(task_id: TaskId, seq: u64, source: PublishFrom, payload: EventPayload) -> Self {
        Self {
            task_id,
            seq,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            source,
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn is_terminal(&self) -> bool {
        self.payload.is_terminal()
    }
}
