//! Distributed channel backend over NATS core pub/sub.
//!
//! Each task maps to the subject `{prefix}.{task_id}`. Events travel as JSON.
//! Delivery is at-most-once: a reconnect replays nothing, and events published
//! while no subscriber is attached are lost. Ordering holds because every
//! publisher of a task shares this backend's single client connection.

use super::{ChannelBackend, EventChannel, PublishGate, ReceiveOutcome, Subscription};
use crate::error::ChannelError;
use crate::event::{Event, EventPayload, PublishFrom};
use crate::types::TaskId;
use async_nats::{Client, Subscriber};
use async_trait::async_trait;
use futures::{FutureExt, Stream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type ChannelMap = RwLock<HashMap<TaskId, Arc<NatsChannel>>>;

/// One task's NATS subject and subscription.
pub struct NatsChannel {
    task_id: TaskId,
    subject: String,
    client: Client,
    subscriber: Mutex<Option<Subscriber>>,
    gate: PublishGate,
    closed: CancellationToken,
    released: AtomicBool,
    releases: AtomicUsize,
    registry: Weak<ChannelMap>,
}

impl NatsChannel {
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[async_trait]
impl EventChannel for NatsChannel {
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
        let bytes =
            serde_json::to_vec(&event).map_err(|e| ChannelError::Serialization(e.to_string()))?;

        self.client
            .publish(self.subject.clone(), bytes.into())
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        self.gate.commit(&mut state, &event);
        Ok(event)
    }

    async fn receive(&self, timeout: Duration) -> ReceiveOutcome {
        let mut guard = self.subscriber.lock().await;
        let deadline = Instant::now() + timeout;

        loop {
            let Some(subscriber) = guard.as_mut() else {
                return ReceiveOutcome::Closed;
            };

            let next = tokio::select! {
                biased;
                _ = self.closed.cancelled() => None,
                received = tokio::time::timeout_at(deadline, subscriber.next()) => Some(received),
            };

            match next {
                None => {
                    // Events already delivered to the client survive the close.
                    let payloads = subscriber.by_ref().map(|message| message.payload);
                    if let Some(event) = next_ready_event(&self.task_id, &self.subject, payloads) {
                        return ReceiveOutcome::Event(event);
                    }
                    // Dropping the subscriber unsubscribes on the server.
                    guard.take();
                    return ReceiveOutcome::Closed;
                }
                Some(Err(_)) => return ReceiveOutcome::Timeout,
                Some(Ok(None)) => return ReceiveOutcome::Disconnected,
                Some(Ok(Some(message))) => {
                    if let Some(event) = decode_event(&self.task_id, &self.subject, &message.payload)
                    {
                        return ReceiveOutcome::Event(event);
                    }
                }
            }
        }
    }

    fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.cancel();
        // The next receive drains what the client already buffered, then
        // drops the subscriber.
        self.releases.fetch_add(1, Ordering::SeqCst);
        if let Some(registry) = self.registry.upgrade() {
            registry.write().remove(&self.task_id);
        }
        debug!(task_id = %self.task_id, subject = %self.subject, "NATS channel released");
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

fn decode_event(task_id: &TaskId, subject: &str, payload: &[u8]) -> Option<Event> {
    match serde_json::from_slice::<Event>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(
                task_id = %task_id,
                subject = %subject,
                error = %e,
                "Skipping undecodable event"
            );
            None
        }
    }
}

/// First decodable event among those `payloads` can yield without waiting.
fn next_ready_event<S, B>(task_id: &TaskId, subject: &str, mut payloads: S) -> Option<Event>
where
    S: Stream<Item = B> + Unpin,
    B: AsRef<[u8]>,
{
    while let Some(Some(payload)) = payloads.next().now_or_never() {
        if let Some(event) = decode_event(task_id, subject, payload.as_ref()) {
            return Some(event);
        }
    }
    None
}

/// Backend creating one NATS subscription per task.
pub struct NatsBackend {
    client: Client,
    subject_prefix: String,
    channels: Arc<ChannelMap>,
    created: AtomicUsize,
}

impl NatsBackend {
    /// Connect to `url`, retrying the initial connection.
    ///
    /// `GENPIPE_NATS_USER`/`GENPIPE_NATS_PASS` are injected into the URL when it
    /// carries no credentials; `GENPIPE_NATS_TLS=1` upgrades the scheme.
    pub async fn connect(url: &str, subject_prefix: &str) -> Result<Self, ChannelError> {
        let client = connect_with_env(url).await?;
        info!(url = %redact(url), subject_prefix, "Connected to NATS");
        Ok(Self::with_client(client, subject_prefix))
    }

    pub fn with_client(client: Client, subject_prefix: &str) -> Self {
        Self {
            client,
            subject_prefix: subject_prefix.trim_end_matches('.').to_string(),
            channels: Arc::new(RwLock::new(HashMap::new())),
            created: AtomicUsize::new(0),
        }
    }

    fn subject_for(&self, task_id: &TaskId) -> String {
        format!("{}.{}", self.subject_prefix, task_id)
    }
}

async fn connect_with_env(url: &str) -> Result<Client, ChannelError> {
    let mut target = url.to_string();
    if std::env::var("GENPIPE_NATS_TLS").ok().as_deref() == Some("1") {
        target = target.replacen("nats://", "tls://", 1);
    }
    if !target.contains('@') {
        if let (Ok(user), Ok(pass)) = (
            std::env::var("GENPIPE_NATS_USER"),
            std::env::var("GENPIPE_NATS_PASS"),
        ) {
            if let Some((scheme, rest)) = target.split_once("://") {
                target = format!("{}://{}:{}@{}", scheme, user, pass, rest);
            }
        }
    }

    let retries: u32 = std::env::var("GENPIPE_NATS_CONNECT_RETRIES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3);
    let backoff_ms: u64 = std::env::var("GENPIPE_NATS_CONNECT_BACKOFF_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(500);

    let mut last_err = None;
    for attempt in 0..=retries {
        match async_nats::connect(&target).await {
            Ok(client) => return Ok(client),
            Err(e) => {
                warn!(attempt, error = %e, "NATS connect failed");
                last_err = Some(e.to_string());
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
    }
    Err(ChannelError::Transport(
        last_err.unwrap_or_else(|| "nats connect failed".to_string()),
    ))
}

fn redact(url: &str) -> String {
    match (url.split_once("://"), url.rsplit_once('@')) {
        (Some((scheme, _)), Some((_, host))) => format!("{}://***@{}", scheme, host),
        _ => url.to_string(),
    }
}

#[async_trait]
impl ChannelBackend for NatsBackend {
    async fn subscribe(&self, task_id: &TaskId) -> Result<Subscription, ChannelError> {
        let existing = self.channels.read().get(task_id).cloned();
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let subject = self.subject_for(task_id);
        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        let mut channels = self.channels.write();
        // Lost a race with a concurrent subscribe; keep the first handle.
        if let Some(existing) = channels.get(task_id).cloned() {
            return Ok(existing);
        }
        let channel = Arc::new(NatsChannel {
            task_id: task_id.clone(),
            subject: subject.clone(),
            client: self.client.clone(),
            subscriber: Mutex::new(Some(subscriber)),
            gate: PublishGate::new(),
            closed: CancellationToken::new(),
            released: AtomicBool::new(false),
            releases: AtomicUsize::new(0),
            registry: Arc::downgrade(&self.channels),
        });
        channels.insert(task_id.clone(), channel.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        debug!(task_id = %task_id, subject = %subject, "NATS channel subscribed");
        Ok(channel)
    }

    fn active_subscriptions(&self) -> usize {
        self.channels.read().len()
    }

    fn subscriptions_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "nats"
    }
}
