//! Running-task registry.
//!
//! Tracks every in-flight task so that at most one worker runs per task id and
//! so that an owner can stop a task they started.

use crate::channel::Subscription;
use crate::error::GenerationError;
use crate::request::InvokeFrom;
use crate::types::TaskId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to one running task
#[derive(Clone)]
pub struct TaskHandle {
    pub task_id: TaskId,
    pub invoke_from: InvokeFrom,
    pub principal_id: String,
    pub cancel: CancellationToken,
    pub channel: Subscription,
    pub started_at: Instant,
}

impl TaskHandle {
    pub fn new(
        task_id: TaskId,
        invoke_from: InvokeFrom,
        principal_id: impl Into<String>,
        cancel: CancellationToken,
        channel: Subscription,
    ) -> Self {
        Self {
            task_id,
            invoke_from,
            principal_id: principal_id.into(),
            cancel,
            channel,
            started_at: Instant::now(),
        }
    }

    /// Whether `principal_id`, calling from `invoke_from`, started this task.
    pub fn is_owned_by(&self, invoke_from: InvokeFrom, principal_id: &str) -> bool {
        self.invoke_from.is_end_user() == invoke_from.is_end_user()
            && self.principal_id == principal_id
    }
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, TaskHandle>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Fails if a worker is already running for its id.
    pub fn register(&self, handle: TaskHandle) -> Result<(), GenerationError> {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&handle.task_id) {
            return Err(GenerationError::InvalidRequest(format!(
                "Task {} is already running",
                handle.task_id
            )));
        }
        debug!(task_id = %handle.task_id, invoke_from = %handle.invoke_from, "Task registered");
        tasks.insert(handle.task_id.clone(), handle);
        Ok(())
    }

    pub fn get(&self, task_id: &TaskId) -> Option<TaskHandle> {
        self.tasks.read().get(task_id).cloned()
    }

    pub fn remove(&self, task_id: &TaskId) -> Option<TaskHandle> {
        let removed = self.tasks.write().remove(task_id);
        if removed.is_some() {
            debug!(task_id = %task_id, "Task deregistered");
        }
        removed
    }

    /// Look up a task for a stop request, checking ownership.
    pub fn authorize_stop(
        &self,
        task_id: &TaskId,
        invoke_from: InvokeFrom,
        principal_id: &str,
    ) -> Result<TaskHandle, GenerationError> {
        let handle = self
            .get(task_id)
            .ok_or_else(|| GenerationError::TaskNotFound(task_id.to_string()))?;
        if !handle.is_owned_by(invoke_from, principal_id) {
            return Err(GenerationError::Unauthorized(task_id.to_string()));
        }
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}
