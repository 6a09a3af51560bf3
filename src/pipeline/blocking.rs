use super::{ChannelRelease, PipelineState, TaskPipeline};
use crate::channel::ReceiveOutcome;
use crate::error::GenerationError;
use crate::event::{Event, EventPayload, MessageEndPayload, MessageMetadata};
use crate::request::GenerationRequest;
use crate::types::{now_seconds, TaskId};
use serde::Serialize;
use tracing::{debug, info};

/// Aggregated result of a blocking generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockingResponse {
    pub event: &'static str,
    pub task_id: TaskId,
    pub message_id: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub message: String,
    #[serde(flatten)]
    pub metadata: MessageMetadata,
    pub created_at: i64,
}

/// Folds message deltas into the final answer.
#[derive(Debug)]
pub(crate) struct Accumulator {
    state: PipelineState,
    text: String,
}

pub(crate) enum Step {
    Continue,
    Done(MessageEndPayload),
    Failed(GenerationError),
    Stopped,
}

impl Accumulator {
    pub(crate) fn new() -> Self {
        Self {
            state: PipelineState::Init,
            text: String::new(),
        }
    }

    pub(crate) fn state(&self) -> PipelineState {
        self.state
    }

    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn apply(&mut self, event: Event) -> Step {
        match event.payload {
            EventPayload::Message(message) => {
                self.state = PipelineState::Accumulating;
                self.text.push_str(&message.text);
                Step::Continue
            }
            EventPayload::MessageReplace(message) => {
                self.state = PipelineState::Accumulating;
                self.text = message.text;
                Step::Continue
            }
            EventPayload::Chain(_) | EventPayload::AgentThought(_) | EventPayload::Ping(_) => {
                Step::Continue
            }
            EventPayload::MessageEnd(end) => {
                self.state = PipelineState::Done;
                if let Some(answer) = end.answer.as_deref().filter(|a| !a.is_empty()) {
                    self.text = answer.to_string();
                }
                Step::Done(end)
            }
            EventPayload::Error(payload) => {
                self.state = PipelineState::Failed;
                Step::Failed(GenerationError::Task(payload))
            }
            EventPayload::Stop(_) => {
                self.state = PipelineState::Stopped;
                Step::Stopped
            }
        }
    }

    fn stop(&mut self) {
        self.state = PipelineState::Stopped;
    }

    fn into_response(self, request: &GenerationRequest, end: MessageEndPayload) -> BlockingResponse {
        BlockingResponse {
            event: "message",
            task_id: request.task_id.clone(),
            message_id: request.message_id().to_string(),
            conversation_id: request.conversation_id().to_string(),
            mode: request.orchestration.model.mode.clone(),
            message: self.text,
            metadata: end.metadata,
            created_at: now_seconds(),
        }
    }
}

pub(super) async fn collect(pipeline: TaskPipeline) -> Result<BlockingResponse, GenerationError> {
    let _release = ChannelRelease::new(pipeline.channel.clone(), pipeline.cancel.clone());
    let task_id = &pipeline.request.task_id;
    let mut acc = Accumulator::new();

    let result = loop {
        match pipeline.channel.receive(pipeline.receive_timeout).await {
            ReceiveOutcome::Event(event) => match acc.apply(event) {
                Step::Continue => {}
                Step::Done(end) => {
                    break Ok(end);
                }
                Step::Failed(err) => break Err(err),
                Step::Stopped => break Err(GenerationError::Stopped),
            },
            outcome => {
                debug!(task_id = %task_id, outcome = ?outcome, "Blocking consumer stopping");
                acc.stop();
                break Err(GenerationError::Stopped);
            }
        }
    };

    info!(
        task_id = %task_id,
        state = ?acc.state(),
        answer_len = acc.text().len(),
        "Blocking generation finished"
    );
    result.map(|end| acc.into_response(&pipeline.request, end))
}
