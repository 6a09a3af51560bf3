//! Persistence collaborator.
//!
//! The orchestrator creates the conversation and message records before a
//! worker starts; the worker appends streamed content and releases any
//! per-task resources when it finishes. [`MemoryGenerationStore`] is the
//! in-process implementation used by the demo binary and the tests.

use crate::error::GenerationError;
use crate::request::{GenerationDraft, GenerationRecords, InvokeFrom};
use crate::types::{now_seconds, TaskId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// Create (or continue) the conversation and create a fresh message.
    async fn create_generation_records(
        &self,
        draft: &GenerationDraft,
    ) -> Result<GenerationRecords, GenerationError>;

    /// Append a streamed text delta to the message's answer.
    async fn append_incremental_content(
        &self,
        message_id: &str,
        delta: &str,
    ) -> Result<(), GenerationError>;

    /// Replace the message's answer wholesale.
    async fn replace_content(&self, message_id: &str, text: &str) -> Result<(), GenerationError>;

    /// Called once by every worker on exit, whatever the outcome.
    fn release_thread_resources(&self, _task_id: &TaskId) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRecord {
    pub id: String,
    pub app_id: String,
    pub invoke_from: InvokeFrom,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub task_id: TaskId,
    pub query: String,
    pub answer: String,
    pub agent_based: bool,
    /// Set for end-user callers (web app, service API)
    pub from_end_user_id: Option<String>,
    /// Set for console callers (debugger, explore)
    pub from_account_id: Option<String>,
    pub created_at: i64,
}

/// In-memory [`GenerationStore`].
#[derive(Default)]
pub struct MemoryGenerationStore {
    conversations: RwLock<HashMap<String, ConversationRecord>>,
    messages: RwLock<HashMap<String, MessageRecord>>,
    releases: AtomicUsize,
}

impl MemoryGenerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(&self, message_id: &str) -> Option<MessageRecord> {
        self.messages.read().get(message_id).cloned()
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<ConversationRecord> {
        self.conversations.read().get(conversation_id).cloned()
    }

    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }

    /// Number of `release_thread_resources` calls seen so far.
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationStore for MemoryGenerationStore {
    async fn create_generation_records(
        &self,
        draft: &GenerationDraft,
    ) -> Result<GenerationRecords, GenerationError> {
        let now = now_seconds();
        let conversation_id = match &draft.conversation_id {
            Some(id) => {
                let conversations = self.conversations.read();
                let existing = conversations.get(id).ok_or_else(|| {
                    GenerationError::InvalidRequest(format!("Conversation not exists: {}", id))
                })?;
                if existing.app_id != draft.app_id {
                    return Err(GenerationError::InvalidRequest(format!(
                        "Conversation {} belongs to another app",
                        id
                    )));
                }
                id.clone()
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                self.conversations.write().insert(
                    id.clone(),
                    ConversationRecord {
                        id: id.clone(),
                        app_id: draft.app_id.clone(),
                        invoke_from: draft.invoke_from,
                        created_at: now,
                    },
                );
                id
            }
        };

        let (from_end_user_id, from_account_id) = if draft.invoke_from.is_end_user() {
            (Some(draft.principal_id.clone()), None)
        } else {
            (None, Some(draft.principal_id.clone()))
        };

        let message_id = uuid::Uuid::new_v4().to_string();
        self.messages.write().insert(
            message_id.clone(),
            MessageRecord {
                id: message_id.clone(),
                conversation_id: conversation_id.clone(),
                task_id: draft.task_id.clone(),
                query: draft.inputs.query.clone().unwrap_or_default(),
                answer: String::new(),
                agent_based: draft.orchestration.is_agent(),
                from_end_user_id,
                from_account_id,
                created_at: now,
            },
        );

        debug!(
            task_id = %draft.task_id,
            conversation_id = %conversation_id,
            message_id = %message_id,
            "Generation records created"
        );
        Ok(GenerationRecords {
            conversation_id,
            message_id,
        })
    }

    async fn append_incremental_content(
        &self,
        message_id: &str,
        delta: &str,
    ) -> Result<(), GenerationError> {
        let mut messages = self.messages.write();
        let message = messages.get_mut(message_id).ok_or_else(|| {
            GenerationError::Persistence(format!("Message not found: {}", message_id))
        })?;
        message.answer.push_str(delta);
        Ok(())
    }

    async fn replace_content(&self, message_id: &str, text: &str) -> Result<(), GenerationError> {
        let mut messages = self.messages.write();
        let message = messages.get_mut(message_id).ok_or_else(|| {
            GenerationError::Persistence(format!("Message not found: {}", message_id))
        })?;
        message.answer = text.to_string();
        Ok(())
    }

    fn release_thread_resources(&self, task_id: &TaskId) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        debug!(task_id = %task_id, "Worker resources released");
    }
}
