//! Event channels
//!
//! One channel per task carries events from the worker (and the watchdog) to the
//! single consumer. Two interchangeable backends sit behind [`ChannelBackend`]:
//! an in-process bounded queue ([`local::LocalBackend`]) and, with the `nats`
//! feature, a distributed pub/sub subject ([`nats::NatsBackend`]).
//!
//! Guarantees shared by both backends:
//! - events of one task are delivered in publish order, each stamped with a
//!   per-task monotonically increasing sequence number;
//! - once a terminal event has been accepted, further publishes fail with
//!   [`ChannelError::Terminated`];
//! - `unsubscribe` releases the transport exactly once, however many times and
//!   from however many exit paths it is called.

use crate::config::{ChannelBackendKind, ChannelConfig};
use crate::error::{ChannelError, GenerationError};
use crate::event::{Event, EventPayload, PublishFrom};
use crate::types::TaskId;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

pub mod local;
#[cfg(feature = "nats")]
pub mod nats;

pub use local::{LocalBackend, LocalChannel};
#[cfg(feature = "nats")]
pub use nats::{NatsBackend, NatsChannel};

/// Result of a single receive attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveOutcome {
    Event(Event),
    /// Nothing arrived within the timeout
    Timeout,
    /// The channel was unsubscribed
    Closed,
    /// The transport went away underneath the consumer
    Disconnected,
}

/// Per-task transport handle shared by producer(s) and the consumer.
#[async_trait]
pub trait EventChannel: Send + Sync {
    fn task_id(&self) -> &TaskId;

    /// Stamp `payload` with the next sequence number and append it.
    ///
    /// Blocks while a bounded transport is full rather than dropping the event.
    async fn publish(&self, payload: EventPayload, from: PublishFrom)
        -> Result<Event, ChannelError>;

    /// Wait for the next event, the timeout, or channel closure.
    async fn receive(&self, timeout: Duration) -> ReceiveOutcome;

    /// Release transport resources. Idempotent.
    fn unsubscribe(&self);

    fn is_closed(&self) -> bool;

    /// True once a terminal event has been published through this handle.
    fn is_terminated(&self) -> bool;

    /// How many times the underlying transport handle was released (0 or 1).
    fn release_count(&self) -> usize;
}

/// Shared handle to a task's channel
pub type Subscription = Arc<dyn EventChannel>;

/// Factory for per-task channels.
#[async_trait]
pub trait ChannelBackend: Send + Sync {
    /// Subscribe to a task's channel. A second subscribe for a task that is
    /// still subscribed returns the existing handle.
    async fn subscribe(&self, task_id: &TaskId) -> Result<Subscription, ChannelError>;

    /// Channels currently subscribed and not yet released
    fn active_subscriptions(&self) -> usize;

    /// Channels created over the backend's lifetime
    fn subscriptions_created(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// Build the backend selected by configuration.
pub async fn backend_from_config(
    config: &ChannelConfig,
) -> Result<Arc<dyn ChannelBackend>, GenerationError> {
    let kind = config
        .backend_kind()
        .map_err(|e| GenerationError::Config(e.to_string()))?;
    match kind {
        ChannelBackendKind::Local => Ok(Arc::new(LocalBackend::new(config.capacity))),
        #[cfg(feature = "nats")]
        ChannelBackendKind::Nats => {
            let backend = NatsBackend::connect(&config.nats_url, &config.subject_prefix).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "nats"))]
        ChannelBackendKind::Nats => Err(GenerationError::Config(
            "Channel backend 'nats' requires the `nats` feature".to_string(),
        )),
    }
}

/// Sequencing state guarded for the duration of one publish.
pub(crate) struct GateState {
    next_seq: u64,
    terminated: bool,
}

impl GateState {
    /// Build the next event, refusing anything after a terminal one.
    pub(crate) fn stamp(
        &self,
        task_id: &TaskId,
        from: PublishFrom,
        payload: EventPayload,
    ) -> Result<Event, ChannelError> {
        if self.terminated {
            return Err(ChannelError::Terminated(task_id.to_string()));
        }
        Ok(Event::new(task_id.clone(), self.next_seq, from, payload))
    }
}

/// Serializes publishers of one channel so that sequence numbers, transport
/// order and the terminal guard stay consistent.
pub(crate) struct PublishGate {
    state: Mutex<GateState>,
    terminated: AtomicBool,
}

impl PublishGate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                next_seq: 1,
                terminated: false,
            }),
            terminated: AtomicBool::new(false),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().await
    }

    /// Record a successfully transported event.
    pub(crate) fn commit(&self, state: &mut GateState, event: &Event) {
        state.next_seq = event.seq + 1;
        if event.is_terminal() {
            state.terminated = true;
            self.terminated.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}
