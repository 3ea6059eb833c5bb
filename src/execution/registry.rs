//! # Task Registry
//!
//! Bookkeeping for background tasks that are currently executing. The registry
//! is what lets the worker lifecycle manager answer "is it safe to recycle this
//! worker right now?".
//!
//! All operations serialize through one `parking_lot::Mutex`. Every critical
//! section is an in-memory map edit, so the lock is never held across I/O or an
//! `.await`, and [`TaskRegistry::has_active_tasks`] stays safe to call from a
//! signal-handling task.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::execution::types::TaskLabel;
use crate::state_machine::TaskState;

/// Final outcome reported when a task stops executing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
}

/// Full record of a task known to the registry
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub kind: String,
    pub description: String,
    pub state: TaskState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_duration: Option<Duration>,
    pub actual_duration: Option<Duration>,
    pub error: Option<String>,
}

/// Diagnostic view of a running task
#[derive(Debug, Clone, Serialize)]
pub struct ActiveTaskDetail {
    pub task_id: String,
    pub kind: String,
    pub description: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub estimated_duration: Option<Duration>,
}

/// Cumulative counters since the registry was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryCounters {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct RegistryInner {
    tasks: HashMap<String, TaskRecord>,
    active: usize,
    counters: RegistryCounters,
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task that has just started executing and return its fresh id
    pub fn register(
        &self,
        kind: &str,
        description: &str,
        estimated_duration: Option<Duration>,
    ) -> String {
        let task_id = Uuid::new_v4().to_string();
        let label = TaskLabel {
            kind: kind.to_string(),
            description: description.to_string(),
            estimated_duration,
        };
        self.register_with_id(&task_id, &label, Utc::now());
        task_id
    }

    /// Register a task under an id chosen by the caller (the executor reuses
    /// the id it handed out at submission time)
    pub fn register_with_id(&self, task_id: &str, label: &TaskLabel, submitted_at: DateTime<Utc>) {
        let now = Utc::now();
        let record = TaskRecord {
            task_id: task_id.to_string(),
            kind: label.kind.clone(),
            description: label.description.clone(),
            state: TaskState::Running,
            submitted_at,
            started_at: now,
            completed_at: None,
            estimated_duration: label.estimated_duration,
            actual_duration: None,
            error: None,
        };

        let mut inner = self.inner.lock();
        if let Some(previous) = inner.tasks.insert(task_id.to_string(), record) {
            if previous.state.is_active() {
                // Re-registering a running id must not inflate the active count
                inner.active -= 1;
            }
        }
        inner.active += 1;
        inner.counters.started += 1;
        let active = inner.active;
        drop(inner);

        debug!(
            task_id = %task_id,
            kind = %label.kind,
            estimated_s = label.estimated_duration.map(|d| d.as_secs()),
            active_tasks = active,
            "▶️ REGISTRY: Task registered"
        );
    }

    /// Mark a task finished. Unknown or already-finished ids are ignored.
    pub fn unregister(&self, task_id: &str, outcome: TaskOutcome) {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let Some(record) = inner.tasks.get_mut(task_id) else {
            debug!(task_id = %task_id, "REGISTRY: Unregister for unknown task ignored");
            return;
        };
        if !record.state.is_active() {
            debug!(task_id = %task_id, state = %record.state, "REGISTRY: Task already finished");
            return;
        }

        let actual = (now - record.started_at).to_std().unwrap_or_default();
        record.completed_at = Some(now);
        record.actual_duration = Some(actual);
        let kind = record.kind.clone();
        let failed = match outcome {
            TaskOutcome::Completed => {
                record.state = TaskState::Completed;
                false
            }
            TaskOutcome::Failed(reason) => {
                record.state = TaskState::Failed;
                record.error = Some(reason);
                true
            }
        };

        inner.active -= 1;
        if failed {
            inner.counters.failed += 1;
        } else {
            inner.counters.completed += 1;
        }
        let active = inner.active;
        drop(inner);

        if failed {
            warn!(
                task_id = %task_id,
                kind = %kind,
                duration_ms = actual.as_millis() as u64,
                active_tasks = active,
                "❌ REGISTRY: Task failed"
            );
        } else {
            debug!(
                task_id = %task_id,
                kind = %kind,
                duration_ms = actual.as_millis() as u64,
                active_tasks = active,
                "✅ REGISTRY: Task completed"
            );
        }
    }

    /// True iff at least one registered task is running
    pub fn has_active_tasks(&self) -> bool {
        self.inner.lock().active > 0
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active
    }

    pub fn active_count_by_kind(&self) -> BTreeMap<String, usize> {
        let inner = self.inner.lock();
        let mut counts = BTreeMap::new();
        for record in inner.tasks.values().filter(|r| r.state.is_active()) {
            *counts.entry(record.kind.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Running tasks with their elapsed time, longest-running first
    pub fn snapshot_active(&self) -> Vec<ActiveTaskDetail> {
        let now = Utc::now();
        let inner = self.inner.lock();
        let mut details: Vec<ActiveTaskDetail> = inner
            .tasks
            .values()
            .filter(|r| r.state.is_active())
            .map(|r| ActiveTaskDetail {
                task_id: r.task_id.clone(),
                kind: r.kind.clone(),
                description: r.description.clone(),
                started_at: r.started_at,
                elapsed: (now - r.started_at).to_std().unwrap_or_default(),
                estimated_duration: r.estimated_duration,
            })
            .collect();
        drop(inner);

        details.sort_by(|a, b| b.elapsed.cmp(&a.elapsed));
        details
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.lock().tasks.get(task_id).cloned()
    }

    pub fn counters(&self) -> RegistryCounters {
        self.inner.lock().counters
    }

    /// Number of records held, finished ones included
    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop finished records that completed more than `age` ago. Returns the
    /// number of records purged.
    pub fn cleanup_older_than(&self, age: Duration) -> usize {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut inner = self.inner.lock();
        let before = inner.tasks.len();
        inner.tasks.retain(|_, record| match record.completed_at {
            Some(done) if record.state.is_terminal() => done > cutoff,
            _ => true,
        });
        let purged = before - inner.tasks.len();
        drop(inner);

        if purged > 0 {
            info!(purged = purged, "🧹 REGISTRY: Purged finished task records");
        }
        purged
    }
}
