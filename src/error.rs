//! Error types for the notification pipeline.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NotifierError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Timed out after {elapsed:?}: {operation}")]
    Timeout { operation: String, elapsed: Duration },
    #[error("Channel send failure on {channel}: {reason}")]
    ChannelSendFailure { channel: String, reason: String },
    #[error("Batch {batch_id} stalled in processing (retry {retry_count})")]
    StalledJob { batch_id: String, retry_count: u32 },
    #[error("Task {task_id} failed: {reason}")]
    TaskFailed { task_id: String, reason: String },
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl NotifierError {
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Whether a caller can reasonably retry or degrade instead of giving up
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Timeout { .. }
                | Self::ChannelSendFailure { .. }
                | Self::StalledJob { .. }
                | Self::Connection(_)
        )
    }
}

impl From<config::ConfigError> for NotifierError {
    fn from(error: config::ConfigError) -> Self {
        NotifierError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NotifierError>;
