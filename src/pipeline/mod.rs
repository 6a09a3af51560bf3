//! Consumer side of a task's channel.
//!
//! A [`TaskPipeline`] turns the event sequence of one task into what the caller
//! asked for: a single aggregated [`BlockingResponse`], or a lazy
//! [`FrameStream`] of wire frames. Whatever the exit path (terminal event,
//! timeout, closure, disconnect, or the caller dropping the stream) the channel
//! is unsubscribed exactly once and the worker is asked to stop.

mod blocking;
mod frame;
mod stream;

pub use blocking::BlockingResponse;
pub use frame::Frame;
pub use stream::FrameStream;

use crate::channel::Subscription;
use crate::error::GenerationError;
use crate::request::GenerationRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Consumer progress through a task's events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Accumulating,
    Done,
    Failed,
    Stopped,
}

impl PipelineState {
    pub fn is_final(self) -> bool {
        matches!(
            self,
            PipelineState::Done | PipelineState::Failed | PipelineState::Stopped
        )
    }
}

/// Result of [`TaskPipeline::process`]
pub enum PipelineOutput {
    Blocking(BlockingResponse),
    Streaming(FrameStream),
}

impl std::fmt::Debug for PipelineOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineOutput::Blocking(response) => f.debug_tuple("Blocking").field(response).finish(),
            PipelineOutput::Streaming(stream) => f
                .debug_tuple("Streaming")
                .field(&stream.task_id().to_string())
                .finish(),
        }
    }
}

pub struct TaskPipeline {
    request: Arc<GenerationRequest>,
    channel: Subscription,
    cancel: CancellationToken,
    receive_timeout: Duration,
}

impl TaskPipeline {
    pub fn new(
        request: Arc<GenerationRequest>,
        channel: Subscription,
        cancel: CancellationToken,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            request,
            channel,
            cancel,
            receive_timeout,
        }
    }

    /// Consume the task's events in the mode the request asked for.
    ///
    /// Blocking mode returns once a terminal event arrives; an `error` event
    /// surfaces as [`GenerationError::Task`] and any cooperative stop as
    /// [`GenerationError::Stopped`]. Streaming mode returns immediately.
    pub async fn process(self) -> Result<PipelineOutput, GenerationError> {
        if self.request.stream {
            Ok(PipelineOutput::Streaming(FrameStream::new(self)))
        } else {
            blocking::collect(self).await.map(PipelineOutput::Blocking)
        }
    }
}

/// Releases the channel and requests a worker stop when dropped.
pub(crate) struct ChannelRelease {
    channel: Subscription,
    cancel: CancellationToken,
}

impl ChannelRelease {
    pub(crate) fn new(channel: Subscription, cancel: CancellationToken) -> Self {
        Self { channel, cancel }
    }
}

impl Drop for ChannelRelease {
    fn drop(&mut self) {
        // A worker that already finished ignores the cancellation.
        self.cancel.cancel();
        self.channel.unsubscribe();
        debug!(task_id = %self.channel.task_id(), "Pipeline released channel");
    }
}
