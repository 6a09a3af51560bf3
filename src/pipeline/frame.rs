use crate::event::{Event, EventKind, EventPayload};
use crate::request::GenerationRequest;
use crate::types::{now_seconds, TaskId};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::warn;

/// One streamed wire frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Serialized content frame
    Data { kind: EventKind, body: Value },
    /// Keep-alive
    Ping,
}

impl Frame {
    /// Map an event to its frame. `stop` events have no frame.
    pub(crate) fn from_event(request: &GenerationRequest, event: &Event) -> Option<Frame> {
        let kind = event.kind();
        let task_id = &request.task_id;
        let encoded = match &event.payload {
            EventPayload::Ping(_) => return Some(Frame::Ping),
            EventPayload::Stop(_) => return None,
            EventPayload::Message(p) | EventPayload::MessageReplace(p) => {
                encode_data(task_id, kind, p)
            }
            EventPayload::Chain(p) => encode_data(task_id, kind, p),
            EventPayload::AgentThought(p) => encode_data(task_id, kind, p),
            EventPayload::MessageEnd(p) => encode_data(task_id, kind, p),
            EventPayload::Error(p) => encode_data(task_id, kind, p),
        };
        // Terminal frames still go out so the consumer sees the end.
        let data = match encoded {
            Some(data) => data,
            None if kind.is_terminal() => Value::Null,
            None => return None,
        };

        Some(Frame::Data {
            kind,
            body: json!({
                "event": kind.as_str(),
                "task_id": request.task_id,
                "message_id": request.message_id(),
                "conversation_id": request.conversation_id(),
                "created_at": now_seconds(),
                "data": data,
            }),
        })
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Frame::Data { kind, .. } => kind.as_str(),
            Frame::Ping => EventKind::Ping.as_str(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Frame::Data { kind, .. } => *kind,
            Frame::Ping => EventKind::Ping,
        }
    }

    pub fn body(&self) -> Option<&Value> {
        match self {
            Frame::Data { body, .. } => Some(body),
            Frame::Ping => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// Server-sent-events encoding of the frame.
    pub fn to_sse(&self) -> String {
        match self {
            Frame::Data { body, .. } => format!("data: {}\n\n", body),
            Frame::Ping => "event: ping\n\n".to_string(),
        }
    }
}

fn encode_data<T: Serialize>(task_id: &TaskId, kind: EventKind, data: &T) -> Option<Value> {
    match serde_json::to_value(data) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                task_id = %task_id,
                event = kind.as_str(),
                error = %e,
                "Unserializable frame payload"
            );
            None
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sse())
    }
}
