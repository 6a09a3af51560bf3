//! Error types for the generation pipeline.

use crate::event::ErrorPayload;
use thiserror::Error;

/// Event transport errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel closed: {0}")]
    Closed(String),

    #[error("Task already terminated: {0}")]
    Terminated(String),

    #[error("Event serialization failed: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors surfaced to callers of the orchestrator and the task pipeline
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Generation failed ({}): {}", .0.code, .0.message)]
    Task(ErrorPayload),

    #[error("Generation stopped before completion")]
    Stopped,

    #[error("Not allowed to stop task: {0}")]
    Unauthorized(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),
}

impl GenerationError {
    /// True for the cooperative-stop outcome, which is not a failure.
    pub fn is_stopped(&self) -> bool {
        matches!(self, GenerationError::Stopped)
    }
}

impl From<config::ConfigError> for GenerationError {
    fn from(err: config::ConfigError) -> Self {
        GenerationError::Config(err.to_string())
    }
}
