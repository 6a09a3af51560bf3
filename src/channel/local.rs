//! In-process channel backend.
//!
//! Each task gets a bounded tokio mpsc queue. Publishers block when the queue is
//! full; the single consumer drains it through [`EventChannel::receive`].

use super::{ChannelBackend, EventChannel, PublishGate, ReceiveOutcome, Subscription};
use crate::error::ChannelError;
use crate::event::{Event, EventPayload, PublishFrom};
use crate::types::TaskId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

type ChannelMap = RwLock<HashMap<TaskId, Arc<LocalChannel>>>;

/// Bounded in-memory channel for one task.
pub struct LocalChannel {
    task_id: TaskId,
    sender: mpsc::Sender<Event>,
    receiver: Mutex<mpsc::Receiver<Event>>,
    gate: PublishGate,
    closed: CancellationToken,
    released: AtomicBool,
    releases: AtomicUsize,
    registry: Weak<ChannelMap>,
}

impl LocalChannel {
    fn new(task_id: TaskId, capacity: usize, registry: Weak<ChannelMap>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            task_id,
            sender,
            receiver: Mutex::new(receiver),
            gate: PublishGate::new(),
            closed: CancellationToken::new(),
            released: AtomicBool::new(false),
            releases: AtomicUsize::new(0),
            registry,
        }
    }
}

#[async_trait]
impl EventChannel for LocalChannel {
    fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    async fn publish(
        &self,
        payload: EventPayload,
        from: PublishFrom,
    ) -> Result<Event, ChannelError> {
        let mut state = self.gate.lock().await;
        if self.closed.is_cancelled() {
            return Err(ChannelError::Closed(self.task_id.to_string()));
        }
        let event = state.stamp(&self.task_id, from, payload)?;

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => {
                return Err(ChannelError::Closed(self.task_id.to_string()));
            }
            sent = self.sender.send(event.clone()) => {
                sent.map_err(|_| ChannelError::Closed(self.task_id.to_string()))?;
            }
        }

        self.gate.commit(&mut state, &event);
        trace!(
            task_id = %self.task_id,
            seq = event.seq,
            kind = %event.kind(),
            "Event published"
        );
        Ok(event)
    }

    async fn receive(&self, timeout: Duration) -> ReceiveOutcome {
        let mut receiver = self.receiver.lock().await;

        // Events already queued are still delivered after close.
        if let Ok(event) = receiver.try_recv() {
            return ReceiveOutcome::Event(event);
        }
        if self.closed.is_cancelled() {
            return ReceiveOutcome::Closed;
        }

        tokio::select! {
            biased;
            received = receiver.recv() => match received {
                Some(event) => ReceiveOutcome::Event(event),
                None => ReceiveOutcome::Disconnected,
            },
            _ = self.closed.cancelled() => match receiver.try_recv() {
                Ok(event) => ReceiveOutcome::Event(event),
                Err(_) => ReceiveOutcome::Closed,
            },
            _ = tokio::time::sleep(timeout) => ReceiveOutcome::Timeout,
        }
    }

    fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.cancel();
        self.releases.fetch_add(1, Ordering::SeqCst);
        if let Some(registry) = self.registry.upgrade() {
            registry.write().remove(&self.task_id);
        }
        debug!(task_id = %self.task_id, "Local channel released");
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn is_terminated(&self) -> bool {
        self.gate.is_terminated()
    }

    fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Backend handing out [`LocalChannel`]s keyed by task id.
pub struct LocalBackend {
    channels: Arc<ChannelMap>,
    capacity: usize,
    created: AtomicUsize,
}

impl LocalBackend {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            created: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ChannelBackend for LocalBackend {
    async fn subscribe(&self, task_id: &TaskId) -> Result<Subscription, ChannelError> {
        let mut channels = self.channels.write();
        if let Some(existing) = channels.get(task_id) {
            let existing: Subscription = existing.clone();
            return Ok(existing);
        }

        let channel = Arc::new(LocalChannel::new(
            task_id.clone(),
            self.capacity,
            Arc::downgrade(&self.channels),
        ));
        channels.insert(task_id.clone(), channel.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        debug!(task_id = %task_id, capacity = self.capacity, "Local channel subscribed");
        Ok(channel)
    }

    fn active_subscriptions(&self) -> usize {
        self.channels.read().len()
    }

    fn subscriptions_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
