//! Background worker executing one generation.
//!
//! Every exit path of the runner is mapped to exactly one outcome. On success
//! or a classified failure the worker publishes the single terminal event; a
//! cooperative stop publishes nothing. Nothing propagates out of [`Worker::run`],
//! panics included, and the store's per-task resources are always released.

use crate::event::{ErrorCode, ErrorPayload, EventPayload, PublishFrom};
use crate::runner::{AppRunner, RunContext, RunError, INTERNAL_MESSAGE};
use crate::store::GenerationStore;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    Completed,
    Failed(ErrorCode),
    Stopped,
}

pub struct Worker {
    runner: Arc<dyn AppRunner>,
    store: Arc<dyn GenerationStore>,
}

impl Worker {
    pub fn new(runner: Arc<dyn AppRunner>, store: Arc<dyn GenerationStore>) -> Self {
        Self { runner, store }
    }

    pub async fn run(&self, ctx: RunContext) -> WorkerOutcome {
        let task_id = ctx.request().task_id.clone();
        debug!(task_id = %task_id, "Worker started");

        let result = AssertUnwindSafe(self.runner.run(&ctx)).catch_unwind().await;

        let outcome = match result {
            Ok(Ok(end)) => {
                if ctx.is_stopped() {
                    WorkerOutcome::Stopped
                } else {
                    self.finish(&ctx, EventPayload::MessageEnd(end), WorkerOutcome::Completed)
                        .await
                }
            }
            Ok(Err(RunError::Stopped)) => WorkerOutcome::Stopped,
            Ok(Err(err)) => {
                log_failure(&task_id, &err);
                match err.to_payload() {
                    Some(payload) => {
                        let code = payload.code;
                        self.finish(&ctx, EventPayload::Error(payload), WorkerOutcome::Failed(code))
                            .await
                    }
                    None => WorkerOutcome::Stopped,
                }
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(task_id = %task_id, panic = %detail, "Runner panicked");
                let payload = ErrorPayload::new(ErrorCode::InternalServerError, INTERNAL_MESSAGE);
                self.finish(
                    &ctx,
                    EventPayload::Error(payload),
                    WorkerOutcome::Failed(ErrorCode::InternalServerError),
                )
                .await
            }
        };

        self.store.release_thread_resources(&task_id);
        info!(task_id = %task_id, outcome = ?outcome, "Worker finished");
        outcome
    }

    /// Publish the terminal event, downgrading to a stop if the channel is
    /// already closed or terminated.
    async fn finish(
        &self,
        ctx: &RunContext,
        payload: EventPayload,
        outcome: WorkerOutcome,
    ) -> WorkerOutcome {
        match ctx
            .channel()
            .publish(payload, PublishFrom::ApplicationManager)
            .await
        {
            Ok(_) => outcome,
            Err(err) => match RunError::from(err) {
                RunError::Stopped => WorkerOutcome::Stopped,
                other => {
                    error!(
                        task_id = %ctx.request().task_id,
                        error = %other,
                        "Failed to publish terminal event"
                    );
                    outcome
                }
            },
        }
    }
}

fn log_failure(task_id: &crate::types::TaskId, err: &RunError) {
    match err {
        RunError::Authorization(detail) => {
            warn!(task_id = %task_id, detail = %detail, "Model invocation not authorized")
        }
        RunError::Validation(message) => {
            debug!(task_id = %task_id, message = %message, "Generation rejected")
        }
        RunError::Invoke(_)
        | RunError::QuotaExceeded(_)
        | RunError::ProviderNotInitialized(_)
        | RunError::ModelNotSupported(_) => {
            warn!(task_id = %task_id, error = %err, "Model invocation failed")
        }
        RunError::Channel(_) | RunError::Other(_) => {
            error!(task_id = %task_id, error = ?err, "Unhandled generation error")
        }
        RunError::Stopped => {}
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Completion signal shared between a spawned worker and its watchdog.
///
/// The signal fires when the guard returned by [`WorkerSignal::guard`] drops,
/// so an aborted worker task still releases its watchdog.
#[derive(Clone, Default)]
pub struct WorkerSignal {
    done: CancellationToken,
}

impl WorkerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(&self) -> tokio_util::sync::DropGuard {
        self.done.clone().drop_guard()
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    pub async fn finished(&self) {
        self.done.cancelled().await
    }
}
