//! Shared types for task submission.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kind tag used for submitted batch sub-tasks
pub const KIND_BATCH_PROCESSING: &str = "batch_processing";
/// Kind tag used for single notification sends
pub const KIND_NOTIFICATION: &str = "notification";

/// Value produced by a successful task
pub type TaskValue = serde_json::Value;

/// Result stored for tracked tasks; errors are flattened to their message so
/// the result can be shared with any number of waiters
pub type TaskResult = std::result::Result<TaskValue, String>;

/// Type-erased unit of work accepted by the executor
pub type BoxedTask = BoxFuture<'static, anyhow::Result<TaskValue>>;

/// Grouping and diagnostic metadata attached to a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLabel {
    pub kind: String,
    pub description: String,
    /// Hint for logs and dashboards, never enforced
    pub estimated_duration: Option<Duration>,
}

impl TaskLabel {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            description: kind.clone(),
            kind,
            estimated_duration: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_estimate(mut self, estimate: Duration) -> Self {
        self.estimated_duration = Some(estimate);
        self
    }
}

/// Point-in-time executor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub max_workers: usize,
    pub available_workers: usize,
    pub queued: usize,
    pub tracked_submitted: u64,
    pub background_submitted: u64,
    pub immediate_submitted: u64,
    pub stored_results: usize,
}
