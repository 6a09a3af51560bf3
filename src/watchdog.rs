//! Per-task supervisor.
//!
//! Runs alongside a worker: publishes a `ping` on every heartbeat interval while
//! the worker is alive, and enforces the maximum task lifetime by publishing a
//! `stop` event, requesting cooperative cancellation and releasing the channel.

use crate::channel::Subscription;
use crate::config::WatchdogConfig;
use crate::error::ChannelError;
use crate::event::{EventPayload, PingPayload, PublishFrom, StopReason};
use crate::principal::PrincipalResolver;
use crate::request::GenerationRequest;
use crate::worker::WorkerSignal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogSettings {
    pub max_lifetime: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            max_lifetime: Duration::from_secs(600),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

impl From<&WatchdogConfig> for WatchdogSettings {
    fn from(config: &WatchdogConfig) -> Self {
        Self {
            max_lifetime: Duration::from_millis(config.max_lifetime_ms),
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// The worker finished before the deadline
    WorkerDone,
    /// The deadline passed first; a stop was issued
    TimedOut,
}

pub struct Watchdog {
    request: Arc<GenerationRequest>,
    channel: Subscription,
    cancel: CancellationToken,
    principals: Arc<dyn PrincipalResolver>,
    settings: WatchdogSettings,
}

impl Watchdog {
    pub fn new(
        request: Arc<GenerationRequest>,
        channel: Subscription,
        cancel: CancellationToken,
        principals: Arc<dyn PrincipalResolver>,
        settings: WatchdogSettings,
    ) -> Self {
        Self {
            request,
            channel,
            cancel,
            principals,
            settings,
        }
    }

    /// Supervise until the worker finishes or the lifetime expires.
    pub async fn supervise(self, worker: WorkerSignal) -> WatchdogOutcome {
        let task_id = &self.request.task_id;
        let started = Instant::now();
        let deadline = started + self.settings.max_lifetime;
        let interval = self.settings.heartbeat_interval;

        let mut ticker = tokio::time::interval_at(started + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut beats: u64 = 0;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = worker.finished() => break WatchdogOutcome::WorkerDone,
                _ = tokio::time::sleep_until(deadline) => {
                    self.expire(started).await;
                    break WatchdogOutcome::TimedOut;
                }
                _ = ticker.tick() => {
                    if worker.is_finished() {
                        break WatchdogOutcome::WorkerDone;
                    }
                    // A full queue can hold the publish indefinitely; the
                    // deadline still applies while it waits.
                    tokio::select! {
                        biased;
                        _ = tokio::time::sleep_until(deadline) => {
                            self.expire(started).await;
                            break WatchdogOutcome::TimedOut;
                        }
                        sent = self.heartbeat() => {
                            if sent.is_err() {
                                // The task already ended or the consumer is gone.
                                break WatchdogOutcome::WorkerDone;
                            }
                        }
                    }
                    beats += 1;
                }
            }
        };

        debug!(task_id = %task_id, heartbeats = beats, outcome = ?outcome, "Watchdog finished");
        outcome
    }

    async fn heartbeat(&self) -> Result<(), ChannelError> {
        let principal_id = match self
            .principals
            .resolve(self.request.invoke_from, &self.request.principal_id)
            .await
        {
            Ok(principal) => Some(principal.id().to_string()),
            Err(e) => {
                warn!(task_id = %self.request.task_id, error = %e, "Principal resolution failed");
                None
            }
        };

        let event = self
            .channel
            .publish(
                EventPayload::Ping(PingPayload { principal_id }),
                PublishFrom::Watchdog,
            )
            .await?;
        trace!(task_id = %self.request.task_id, seq = event.seq, "Heartbeat");
        Ok(())
    }

    async fn expire(&self, started: Instant) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        warn!(
            task_id = %self.request.task_id,
            elapsed_ms,
            max_lifetime_ms = self.settings.max_lifetime.as_millis() as u64,
            "Task exceeded maximum lifetime, stopping"
        );

        self.cancel.cancel();
        let publish = self
            .channel
            .publish(EventPayload::stop(StopReason::Timeout), PublishFrom::Watchdog);
        match tokio::time::timeout(self.settings.heartbeat_interval, publish).await {
            Ok(Ok(_)) | Ok(Err(ChannelError::Terminated(_))) | Ok(Err(ChannelError::Closed(_))) => {}
            Ok(Err(e)) => {
                warn!(task_id = %self.request.task_id, error = %e, "Failed to publish stop")
            }
            Err(_) => {
                warn!(task_id = %self.request.task_id, "Channel full, releasing without stop event")
            }
        }
        self.channel.unsubscribe();
    }
}
