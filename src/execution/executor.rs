//! # Task Executor
//!
//! Runs submitted futures on a bounded worker pool without blocking the caller.
//!
//! ## Submission modes
//!
//! - [`TaskExecutor::submit_tracked`] - queued on the tracked FIFO; the result is
//!   retrievable any number of times through [`TaskExecutor::get_result`].
//! - [`TaskExecutor::submit_background`] - queued on a separate fire-and-forget
//!   FIFO; failures are logged and recorded in the registry, never returned.
//! - [`TaskExecutor::submit_immediate`] - bypasses both FIFOs and returns a
//!   [`TaskHandle`] for request-scoped waiting with a timeout.
//!
//! Each FIFO is drained by its own dispatcher task, so a flood of background
//! notification work cannot starve tracked work or the reverse. Both share one
//! semaphore of `max_workers` permits; a permit is held for as long as the
//! unit of work runs, and the task is registered with the [`TaskRegistry`] only
//! once it actually starts.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{NotifierError, Result};
use crate::execution::registry::{TaskOutcome, TaskRegistry};
use crate::execution::types::{BoxedTask, ExecutorStats, TaskLabel, TaskResult, TaskValue};
use crate::logging::log_task_operation;

enum Delivery {
    Tracked(watch::Sender<Option<TaskResult>>),
    Background,
    Immediate,
}

struct QueuedTask {
    task_id: String,
    label: TaskLabel,
    submitted_at: DateTime<Utc>,
    work: BoxedTask,
    delivery: Delivery,
}

struct TrackedSlot {
    receiver: watch::Receiver<Option<TaskResult>>,
    submitted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counters {
    tracked: AtomicU64,
    background: AtomicU64,
    immediate: AtomicU64,
    queued: AtomicUsize,
}

/// Handle to a task submitted with [`TaskExecutor::submit_immediate`]
#[derive(Debug)]
pub struct TaskHandle {
    task_id: String,
    join: JoinHandle<TaskResult>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait up to `timeout` for the task. On timeout the task keeps running.
    pub async fn wait(self, timeout: Duration) -> Result<TaskValue> {
        let task_id = self.task_id;
        match tokio::time::timeout(timeout, self.join).await {
            Err(_) => Err(NotifierError::timeout(format!("task {task_id}"), timeout)),
            Ok(Err(join_error)) => Err(NotifierError::TaskFailed {
                task_id,
                reason: join_error.to_string(),
            }),
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(reason))) => Err(NotifierError::TaskFailed { task_id, reason }),
        }
    }
}

pub struct TaskExecutor {
    registry: Arc<TaskRegistry>,
    permits: Arc<Semaphore>,
    max_workers: usize,
    tracked_tx: mpsc::UnboundedSender<QueuedTask>,
    background_tx: mpsc::UnboundedSender<QueuedTask>,
    results: DashMap<String, TrackedSlot>,
    counters: Arc<Counters>,
    dispatchers: Vec<JoinHandle<()>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("max_workers", &self.max_workers)
            .field("available_workers", &self.permits.available_permits())
            .field("stored_results", &self.results.len())
            .finish()
    }
}

impl TaskExecutor {
    /// Create the executor and spawn its two dispatcher tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(registry: Arc<TaskRegistry>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        let permits = Arc::new(Semaphore::new(max_workers));
        let counters = Arc::new(Counters::default());
        let (tracked_tx, tracked_rx) = mpsc::unbounded_channel();
        let (background_tx, background_rx) = mpsc::unbounded_channel();

        let dispatchers = vec![
            tokio::spawn(dispatch_loop(
                "tracked",
                tracked_rx,
                permits.clone(),
                registry.clone(),
                counters.clone(),
            )),
            tokio::spawn(dispatch_loop(
                "background",
                background_rx,
                permits.clone(),
                registry.clone(),
                counters.clone(),
            )),
        ];

        info!(max_workers = max_workers, "🏊 EXECUTOR: Task executor started");

        Self {
            registry,
            permits,
            max_workers,
            tracked_tx,
            background_tx,
            results: DashMap::new(),
            counters,
            dispatchers,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Queue work whose result will be retrieved later through its task id
    pub fn submit_tracked<F>(&self, label: TaskLabel, work: F) -> Result<String>
    where
        F: Future<Output = anyhow::Result<TaskValue>> + Send + 'static,
    {
        let task_id = Uuid::new_v4().to_string();
        let submitted_at = Utc::now();
        let kind = label.kind.clone();
        let (sender, receiver) = watch::channel(None);
        self.results.insert(
            task_id.clone(),
            TrackedSlot {
                receiver,
                submitted_at,
            },
        );

        let task = QueuedTask {
            task_id: task_id.clone(),
            label,
            submitted_at,
            work: work.boxed(),
            delivery: Delivery::Tracked(sender),
        };
        if let Err(e) = self.enqueue(&self.tracked_tx, task) {
            self.results.remove(&task_id);
            return Err(e);
        }

        self.counters.tracked.fetch_add(1, Ordering::Relaxed);
        log_task_operation("submit", &task_id, &kind, "queued", Some("tracked"));
        Ok(task_id)
    }

    /// Queue fire-and-forget work. Failures are logged, never returned.
    pub fn submit_background<F>(&self, label: TaskLabel, work: F) -> Result<String>
    where
        F: Future<Output = anyhow::Result<TaskValue>> + Send + 'static,
    {
        let task_id = Uuid::new_v4().to_string();
        let kind = label.kind.clone();
        let task = QueuedTask {
            task_id: task_id.clone(),
            label,
            submitted_at: Utc::now(),
            work: work.boxed(),
            delivery: Delivery::Background,
        };
        self.enqueue(&self.background_tx, task)?;

        self.counters.background.fetch_add(1, Ordering::Relaxed);
        log_task_operation("submit", &task_id, &kind, "queued", Some("background"));
        Ok(task_id)
    }

    /// Run work directly on the pool, bypassing the FIFOs
    pub fn submit_immediate<F>(&self, label: TaskLabel, work: F) -> TaskHandle
    where
        F: Future<Output = anyhow::Result<TaskValue>> + Send + 'static,
    {
        let task_id = Uuid::new_v4().to_string();
        let task = QueuedTask {
            task_id: task_id.clone(),
            label,
            submitted_at: Utc::now(),
            work: work.boxed(),
            delivery: Delivery::Immediate,
        };
        let permits = self.permits.clone();
        let registry = self.registry.clone();

        let join = tokio::spawn(async move {
            match permits.acquire_owned().await {
                Ok(permit) => execute(task, permit, registry).await,
                Err(_) => Err("worker pool is closed".to_string()),
            }
        });

        self.counters.immediate.fetch_add(1, Ordering::Relaxed);
        TaskHandle { task_id, join }
    }

    /// Wait up to `timeout` for a tracked task's result.
    ///
    /// Returns `NotFound` for ids this executor never issued (or already
    /// purged), `Timeout` if the task has not finished in time, and
    /// `TaskFailed` carrying the task's own error message.
    pub async fn get_result(&self, task_id: &str, timeout: Duration) -> Result<TaskValue> {
        let mut receiver = self
            .results
            .get(task_id)
            .map(|slot| slot.receiver.clone())
            .ok_or_else(|| NotifierError::NotFound(format!("task {task_id}")))?;

        let waited = tokio::time::timeout(timeout, async move {
            loop {
                let current = receiver.borrow_and_update().clone();
                if current.is_some() {
                    return current;
                }
                if receiver.changed().await.is_err() {
                    return receiver.borrow().clone();
                }
            }
        })
        .await;

        match waited {
            Err(_) => Err(NotifierError::timeout(
                format!("get_result({task_id})"),
                timeout,
            )),
            Ok(None) => Err(NotifierError::TaskFailed {
                task_id: task_id.to_string(),
                reason: "task was dropped before producing a result".to_string(),
            }),
            Ok(Some(Ok(value))) => Ok(value),
            Ok(Some(Err(reason))) => Err(NotifierError::TaskFailed {
                task_id: task_id.to_string(),
                reason,
            }),
        }
    }

    /// Run every unit concurrently and collect results in input order.
    ///
    /// Each slot is `None` if its unit failed, panicked or missed the shared
    /// deadline.
    pub async fn run_parallel<F>(
        &self,
        label: TaskLabel,
        works: Vec<F>,
        timeout: Duration,
    ) -> Vec<Option<TaskValue>>
    where
        F: Future<Output = anyhow::Result<TaskValue>> + Send + 'static,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        let handles: Vec<TaskHandle> = works
            .into_iter()
            .enumerate()
            .map(|(index, work)| {
                let label = label
                    .clone()
                    .with_description(format!("{} [{index}]", label.description));
                self.submit_immediate(label, work)
            })
            .collect();

        futures::future::join_all(handles.into_iter().map(|handle| async move {
            match tokio::time::timeout_at(deadline, handle.join).await {
                Ok(Ok(Ok(value))) => Some(value),
                Ok(Ok(Err(reason))) => {
                    debug!(task_id = %handle.task_id, reason = %reason, "Parallel unit failed");
                    None
                }
                Ok(Err(join_error)) => {
                    warn!(task_id = %handle.task_id, error = %join_error, "Parallel unit aborted");
                    None
                }
                Err(_) => {
                    debug!(task_id = %handle.task_id, "Parallel unit missed deadline");
                    None
                }
            }
        }))
        .await
    }

    /// Forget finished tracked results submitted more than `age` ago
    pub fn purge_results(&self, age: Duration) -> usize {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.results.len();
        self.results
            .retain(|_, slot| slot.receiver.borrow().is_none() || slot.submitted_at > cutoff);
        before.saturating_sub(self.results.len())
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            max_workers: self.max_workers,
            available_workers: self.permits.available_permits(),
            queued: self.counters.queued.load(Ordering::Relaxed),
            tracked_submitted: self.counters.tracked.load(Ordering::Relaxed),
            background_submitted: self.counters.background.load(Ordering::Relaxed),
            immediate_submitted: self.counters.immediate.load(Ordering::Relaxed),
            stored_results: self.results.len(),
        }
    }

    /// Stop both dispatchers. Work already running finishes; queued work is dropped.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        for dispatcher in &self.dispatchers {
            dispatcher.abort();
        }
        info!(
            queued_dropped = self.counters.queued.load(Ordering::Relaxed),
            "🛑 EXECUTOR: Dispatchers stopped"
        );
    }

    /// True once [`TaskExecutor::shutdown`] has run. Queued submissions are refused from then on.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn enqueue(&self, queue: &mpsc::UnboundedSender<QueuedTask>, task: QueuedTask) -> Result<()> {
        if self.is_shut_down() {
            return Err(NotifierError::InvalidState(
                "executor has been shut down".to_string(),
            ));
        }
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        queue.send(task).map_err(|_| {
            self.counters.queued.fetch_sub(1, Ordering::Relaxed);
            NotifierError::InvalidState("executor dispatcher has stopped".to_string())
        })
    }
}

async fn dispatch_loop(
    queue: &'static str,
    mut receiver: mpsc::UnboundedReceiver<QueuedTask>,
    permits: Arc<Semaphore>,
    registry: Arc<TaskRegistry>,
    counters: Arc<Counters>,
) {
    debug!(queue = queue, "🚚 EXECUTOR: Dispatcher started");

    // Waiting for a permit before pulling the next item keeps each queue FIFO
    while let Some(task) = receiver.recv().await {
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(queue = queue, "EXECUTOR: Worker pool closed, dispatcher exiting");
                break;
            }
        };
        counters.queued.fetch_sub(1, Ordering::Relaxed);
        tokio::spawn(execute(task, permit, registry.clone()));
    }

    debug!(queue = queue, "EXECUTOR: Dispatcher stopped");
}

async fn execute(
    task: QueuedTask,
    permit: OwnedSemaphorePermit,
    registry: Arc<TaskRegistry>,
) -> TaskResult {
    let QueuedTask {
        task_id,
        label,
        submitted_at,
        work,
        delivery,
    } = task;

    registry.register_with_id(&task_id, &label, submitted_at);

    let result: TaskResult = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(format!("{error:#}")),
        Err(panic) => Err(panic_message(panic.as_ref())),
    };

    match &result {
        Ok(_) => registry.unregister(&task_id, TaskOutcome::Completed),
        Err(reason) => registry.unregister(&task_id, TaskOutcome::Failed(reason.clone())),
    }
    drop(permit);

    match delivery {
        Delivery::Tracked(sender) => {
            // No receivers left means the result was purged; nothing to deliver
            let _ = sender.send(Some(result.clone()));
        }
        Delivery::Background => {
            if let Err(reason) = &result {
                error!(
                    task_id = %task_id,
                    kind = %label.kind,
                    description = %label.description,
                    reason = %reason,
                    "💥 EXECUTOR: Background task failed"
                );
            }
        }
        Delivery::Immediate => {}
    }

    result
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("task panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("task panicked: {message}")
    } else {
        "task panicked".to_string()
    }
}
