use super::{ChannelRelease, Frame, PipelineState, TaskPipeline};
use crate::channel::ReceiveOutcome;
use crate::types::TaskId;
use futures::stream::{self, BoxStream, Stream};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

/// Lazy sequence of wire frames for one task.
///
/// Ends after the terminal frame, on a `stop` event (silently), or when the
/// channel times out, closes or disconnects. Dropping the stream early releases
/// the channel and asks the worker to stop.
pub struct FrameStream {
    task_id: TaskId,
    inner: BoxStream<'static, Frame>,
}

struct Cursor {
    pipeline: TaskPipeline,
    state: PipelineState,
    _release: ChannelRelease,
}

impl Cursor {
    async fn next_frame(&mut self) -> Option<Frame> {
        if self.state.is_final() {
            return None;
        }
        let task_id = &self.pipeline.request.task_id;

        loop {
            match self.pipeline.channel.receive(self.pipeline.receive_timeout).await {
                ReceiveOutcome::Event(event) => {
                    let frame = Frame::from_event(&self.pipeline.request, &event);
                    if event.is_terminal() {
                        self.state = match frame.as_ref().map(Frame::kind) {
                            Some(crate::event::EventKind::Error) => PipelineState::Failed,
                            Some(_) => PipelineState::Done,
                            None => PipelineState::Stopped,
                        };
                        debug!(task_id = %task_id, state = ?self.state, "Stream reached terminal event");
                    } else if frame.as_ref().map_or(false, |f| *f != Frame::Ping) {
                        self.state = PipelineState::Accumulating;
                    }
                    match frame {
                        Some(frame) => return Some(frame),
                        None if self.state.is_final() => return None,
                        None => continue,
                    }
                }
                outcome => {
                    debug!(task_id = %task_id, outcome = ?outcome, "Stream consumer stopping");
                    self.state = PipelineState::Stopped;
                    return None;
                }
            }
        }
    }
}

impl FrameStream {
    pub(crate) fn new(pipeline: TaskPipeline) -> Self {
        let task_id = pipeline.request.task_id.clone();
        let release = ChannelRelease::new(pipeline.channel.clone(), pipeline.cancel.clone());
        let cursor = Cursor {
            pipeline,
            state: PipelineState::Init,
            _release: release,
        };
        let inner = stream::unfold(cursor, |mut cursor| async move {
            let frame = cursor.next_frame().await?;
            Some((frame, cursor))
        });
        Self {
            task_id,
            inner: Box::pin(inner),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }
}

impl Stream for FrameStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.inner.as_mut().poll_next(cx)
    }
}
