//! Configuration System
//!
//! Layered runtime configuration for channels, the watchdog and the worker pool.
//! Sources merge from built-in defaults, the global XDG file, the workspace
//! file and finally `GENPIPE__*` environment variables.

use crate::logging::LoggingConfig;
use crate::watchdog::WatchdogSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenpipeConfig {
    #[serde(default)]
    pub channel: ChannelConfig,

    #[serde(default)]
    pub watchdog: WatchdogConfig,

    #[serde(default)]
    pub workers: WorkerPoolConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Channel backends known to the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelBackendKind {
    Local,
    Nats,
}

impl ChannelBackendKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "local" => Some(ChannelBackendKind::Local),
            "nats" => Some(ChannelBackendKind::Nats),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// "local" or "nats"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Bounded queue size per task (local backend)
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Consumer idle timeout before the task is treated as stopped
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_capacity() -> usize {
    256
}

fn default_receive_timeout_ms() -> u64 {
    30_000
}

fn default_nats_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_subject_prefix() -> String {
    "genpipe.tasks".to_string()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            capacity: default_capacity(),
            receive_timeout_ms: default_receive_timeout_ms(),
            nats_url: default_nats_url(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

impl ChannelConfig {
    pub fn backend_kind(&self) -> Result<ChannelBackendKind, ValidationError> {
        ChannelBackendKind::parse(&self.backend).ok_or_else(|| {
            ValidationError::Channel(format!(
                "Unknown backend '{}' (expected 'local' or 'nats')",
                self.backend
            ))
        })
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_max_lifetime_ms")]
    pub max_lifetime_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_max_lifetime_ms() -> u64 {
    600_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            max_lifetime_ms: default_max_lifetime_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl WatchdogConfig {
    pub fn settings(&self) -> WatchdogSettings {
        WatchdogSettings::from(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Upper bound on concurrently running workers
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    64
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Channel(String),
    Watchdog(String),
    Workers(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Channel(msg) => write!(f, "Channel: {}", msg),
            ValidationError::Watchdog(msg) => write!(f, "Watchdog: {}", msg),
            ValidationError::Workers(msg) => write!(f, "Workers: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl GenpipeConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.channel.backend_kind() {
            errors.push(e);
        }
        if self.channel.capacity == 0 {
            errors.push(ValidationError::Channel(
                "capacity must be greater than zero".to_string(),
            ));
        }
        if self.channel.receive_timeout_ms == 0 {
            errors.push(ValidationError::Channel(
                "receive_timeout_ms must be greater than zero".to_string(),
            ));
        }
        // Consumers must see at least one heartbeat before giving up.
        if self.channel.receive_timeout_ms <= self.watchdog.heartbeat_interval_ms {
            errors.push(ValidationError::Channel(format!(
                "receive_timeout_ms ({}) must be longer than watchdog.heartbeat_interval_ms ({})",
                self.channel.receive_timeout_ms, self.watchdog.heartbeat_interval_ms
            )));
        }

        if self.watchdog.heartbeat_interval_ms == 0 {
            errors.push(ValidationError::Watchdog(
                "heartbeat_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.watchdog.heartbeat_interval_ms >= self.watchdog.max_lifetime_ms {
            errors.push(ValidationError::Watchdog(format!(
                "heartbeat_interval_ms ({}) must be shorter than max_lifetime_ms ({})",
                self.watchdog.heartbeat_interval_ms, self.watchdog.max_lifetime_ms
            )));
        }

        if self.workers.max_concurrent == 0 {
            errors.push(ValidationError::Workers(
                "max_concurrent must be greater than zero".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
