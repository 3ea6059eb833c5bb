//! # Batch Coordinator
//!
//! Turns "notify N recipients" into paced sub-batch execution.
//!
//! Each tick of the polling loop:
//!
//! 1. collects pending jobs that are due (never processed, or at least one
//!    interval since the last dispatch),
//! 2. resets jobs stuck in processing past the timeout to pending with an
//!    incremented retry count, failing them once retries are exhausted,
//! 3. moves due jobs to processing and submits their current sub-batch to the
//!    executor's background queue,
//! 4. purges terminal jobs older than the retention window.
//!
//! When a sub-batch finishes, its counts are merged and the cursor advances;
//! the job returns to pending, or completes once the cursor reaches the end.
//! The processing state is the exclusion gate, so one job never has two
//! sub-batches in flight from the same dispatch.
//!
//! The job map lock covers only in-memory edits. Sends happen outside it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::batch::job::{
    elapsed_since, BatchJob, BatchResults, BatchStatusSnapshot, NotificationKind, Recipient,
    TestReference,
};
use crate::batch::processor::SubBatchProcessor;
use crate::config::BatchConfig;
use crate::error::{NotifierError, Result};
use crate::execution::{TaskExecutor, TaskLabel, KIND_BATCH_PROCESSING};
use crate::logging::log_batch_operation;
use crate::state_machine::BatchStatus;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Job lifecycle notifications published to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    Created {
        batch_id: String,
        total_sub_batches: usize,
        total_recipients: usize,
    },
    StatusChanged {
        batch_id: String,
        from: BatchStatus,
        to: BatchStatus,
    },
    SubBatchCompleted {
        batch_id: String,
        index: usize,
        results: BatchResults,
    },
    Retried {
        batch_id: String,
        retry_count: u32,
    },
    Failed {
        batch_id: String,
        reason: String,
    },
    Purged {
        batch_id: String,
    },
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub dispatched: usize,
    pub stalled: usize,
    pub failed: usize,
    pub purged: usize,
}

struct Dispatch {
    batch_id: String,
    index: usize,
    kind: NotificationKind,
    recipients: Vec<Recipient>,
}

struct CoordinatorInner {
    jobs: Mutex<HashMap<String, BatchJob>>,
    events: broadcast::Sender<BatchEvent>,
    config: BatchConfig,
    executor: Arc<TaskExecutor>,
    processor: Arc<SubBatchProcessor>,
}

/// One run of the polling loop. Each start gets its own shutdown signal, so
/// a permit left over from an earlier stop cannot end a later loop.
struct PollLoop {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

pub struct BatchCoordinator {
    inner: Arc<CoordinatorInner>,
    running: Arc<AtomicBool>,
    poll_loop: Mutex<Option<PollLoop>>,
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("jobs", &self.inner.jobs.lock().len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl BatchCoordinator {
    pub fn new(
        config: BatchConfig,
        executor: Arc<TaskExecutor>,
        processor: Arc<SubBatchProcessor>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(CoordinatorInner {
                jobs: Mutex::new(HashMap::new()),
                events,
                config,
                executor,
                processor,
            }),
            running: Arc::new(AtomicBool::new(false)),
            poll_loop: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.inner.events.subscribe()
    }

    /// Credentials via SMS and email. `None` falls back to configured defaults.
    pub fn create_credentials_batch(
        &self,
        recipients: Vec<Recipient>,
        batch_size: Option<usize>,
        interval: Option<Duration>,
    ) -> Result<String> {
        self.create_batch(NotificationKind::Credentials, recipients, batch_size, interval)
    }

    pub fn create_email_batch(
        &self,
        recipients: Vec<Recipient>,
        subject: impl Into<String>,
        body: impl Into<String>,
        batch_size: Option<usize>,
        interval: Option<Duration>,
    ) -> Result<String> {
        let kind = NotificationKind::EmailOnly {
            subject: subject.into(),
            body: body.into(),
        };
        self.create_batch(kind, recipients, batch_size, interval)
    }

    pub fn create_test_notification_batch(
        &self,
        test: TestReference,
        recipients: Vec<Recipient>,
        batch_size: Option<usize>,
        interval: Option<Duration>,
    ) -> Result<String> {
        self.create_batch(
            NotificationKind::TestNotification(test),
            recipients,
            batch_size,
            interval,
        )
    }

    fn create_batch(
        &self,
        kind: NotificationKind,
        recipients: Vec<Recipient>,
        batch_size: Option<usize>,
        interval: Option<Duration>,
    ) -> Result<String> {
        if recipients.is_empty() {
            return Err(NotifierError::InvalidInput(
                "batch job needs at least one recipient".to_string(),
            ));
        }
        let batch_id = format!("{}{}", kind.id_prefix(), Uuid::new_v4().simple());
        let job = BatchJob::new(
            batch_id.clone(),
            kind,
            recipients,
            batch_size.unwrap_or(self.inner.config.default_batch_size),
            interval.unwrap_or_else(|| self.inner.config.default_interval()),
            self.inner.config.max_retries,
        )?;
        let total_sub_batches = job.total_sub_batches();
        let total_recipients = job.total_recipients();
        let details = format!(
            "{} recipients in {} sub-batches every {}s",
            total_recipients,
            total_sub_batches,
            job.interval.as_secs()
        );

        self.inner.jobs.lock().insert(batch_id.clone(), job);

        log_batch_operation("create", &batch_id, "pending", None, Some(&details));
        self.inner.publish(BatchEvent::Created {
            batch_id: batch_id.clone(),
            total_sub_batches,
            total_recipients,
        });
        Ok(batch_id)
    }

    pub fn get_batch_status(&self, batch_id: &str) -> Result<BatchStatusSnapshot> {
        self.inner
            .jobs
            .lock()
            .get(batch_id)
            .map(BatchJob::snapshot)
            .ok_or_else(|| NotifierError::NotFound(format!("batch {batch_id}")))
    }

    /// Snapshots of every retained job, oldest first
    pub fn get_all_batches_status(&self) -> Vec<BatchStatusSnapshot> {
        let mut snapshots: Vec<BatchStatusSnapshot> =
            self.inner.jobs.lock().values().map(BatchJob::snapshot).collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshots
    }

    /// Run one scheduling pass now
    pub fn tick(&self) -> TickSummary {
        self.inner.tick_at(Utc::now())
    }

    /// Run one scheduling pass as if the current time were `now`
    pub fn tick_at(&self, now: DateTime<Utc>) -> TickSummary {
        self.inner.tick_at(now)
    }

    /// Start the polling loop on the configured interval
    pub fn start(&self) -> Result<()> {
        self.start_with_interval(self.inner.config.poll_interval())
    }

    pub fn start_with_interval(&self, poll_interval: Duration) -> Result<()> {
        if poll_interval.is_zero() {
            return Err(NotifierError::InvalidInput(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(NotifierError::InvalidState(
                "batch coordinator is already running".to_string(),
            ));
        }

        let inner = self.inner.clone();
        let running = self.running.clone();
        let shutdown = Arc::new(Notify::new());
        let shutdown_notify = shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        let summary = inner.tick_at(Utc::now());
                        if summary != TickSummary::default() {
                            debug!(?summary, "BATCH: Tick complete");
                        }
                    }
                    _ = shutdown_notify.notified() => {
                        info!("Batch polling loop shutting down");
                        break;
                    }
                }
            }
        });
        *self.poll_loop.lock() = Some(PollLoop { handle, shutdown });

        info!(
            poll_interval_ms = poll_interval.as_millis() as u64,
            "🚀 BATCH: Coordinator polling loop started"
        );
        Ok(())
    }

    /// Stop the polling loop. Sub-batches already submitted keep running.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            info!("BATCH: Coordinator already stopped");
            return;
        }
        let poll_loop = self.poll_loop.lock().take();
        if let Some(PollLoop { handle, shutdown }) = poll_loop {
            // notify_one stores a permit if the loop is mid-tick
            shutdown.notify_one();
            if let Err(e) = handle.await {
                warn!(error = %e, "BATCH: Polling loop ended abnormally");
            }
        }
        info!("🛑 BATCH: Coordinator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Jobs in a non-terminal state
    pub fn active_job_count(&self) -> usize {
        self.inner
            .jobs
            .lock()
            .values()
            .filter(|job| !job.status.is_terminal())
            .count()
    }

    #[cfg(test)]
    fn with_job<R>(&self, batch_id: &str, f: impl FnOnce(&mut BatchJob) -> R) -> Option<R> {
        self.inner.jobs.lock().get_mut(batch_id).map(f)
    }
}

impl CoordinatorInner {
    fn publish(&self, event: BatchEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn tick_at(self: &Arc<Self>, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();
        let mut events = Vec::new();
        let mut dispatches = Vec::new();
        let processing_timeout = self.config.processing_timeout();
        let retention = self.config.retention();

        {
            let mut jobs = self.jobs.lock();

            // Due jobs are chosen before stall recovery, so a job reset this
            // tick waits for the next one
            let due: Vec<String> = jobs
                .values()
                .filter(|job| job.is_due(now))
                .map(|job| job.batch_id.clone())
                .collect();

            for job in jobs.values_mut() {
                if job.is_stalled(now, processing_timeout) {
                    summary.stalled += 1;
                    job.retry_count += 1;
                    let stalled = NotifierError::StalledJob {
                        batch_id: job.batch_id.clone(),
                        retry_count: job.retry_count,
                    };
                    warn!(
                        batch_id = %job.batch_id,
                        sub_batch = job.current_sub_batch_index,
                        retry_count = job.retry_count,
                        max_retries = job.max_retries,
                        "⏰ BATCH: {}", stalled
                    );
                    job.last_error = Some(stalled.to_string());
                    if job.retry_count < job.max_retries {
                        transition(job, BatchStatus::Pending, now, &mut events);
                        events.push(BatchEvent::Retried {
                            batch_id: job.batch_id.clone(),
                            retry_count: job.retry_count,
                        });
                    }
                }

                if !job.status.is_terminal() && job.retry_count >= job.max_retries {
                    summary.failed += 1;
                    let reason = format!(
                        "stalled {} times at sub-batch {}",
                        job.retry_count, job.current_sub_batch_index
                    );
                    error!(batch_id = %job.batch_id, reason = %reason, "💥 BATCH: Job failed");
                    transition(job, BatchStatus::Failed, now, &mut events);
                    events.push(BatchEvent::Failed {
                        batch_id: job.batch_id.clone(),
                        reason,
                    });
                }
            }

            for batch_id in due {
                let Some(job) = jobs.get_mut(&batch_id) else {
                    continue;
                };
                if job.status != BatchStatus::Pending {
                    continue;
                }
                let index = job.current_sub_batch_index;
                let Some(recipients) = job.sub_batches.get(index) else {
                    continue;
                };
                let recipients = recipients.clone();
                job.last_processed_at = Some(now);
                transition(job, BatchStatus::Processing, now, &mut events);
                dispatches.push(Dispatch {
                    batch_id,
                    index,
                    kind: job.kind.clone(),
                    recipients,
                });
            }

            let before = jobs.len();
            jobs.retain(|batch_id, job| {
                let expired = job.status.is_terminal()
                    && job
                        .finished_at
                        .is_some_and(|done| elapsed_since(done, now) > retention);
                if expired {
                    events.push(BatchEvent::Purged {
                        batch_id: batch_id.clone(),
                    });
                }
                !expired
            });
            summary.purged = before - jobs.len();
        }

        for event in events {
            self.publish(event);
        }
        for dispatch in dispatches {
            if self.submit(dispatch, now) {
                summary.dispatched += 1;
            }
        }
        if summary.purged > 0 {
            info!(purged = summary.purged, "🧹 BATCH: Purged finished jobs");
        }
        summary
    }

    fn submit(self: &Arc<Self>, dispatch: Dispatch, now: DateTime<Utc>) -> bool {
        let Dispatch {
            batch_id,
            index,
            kind,
            recipients,
        } = dispatch;
        let label = TaskLabel::new(KIND_BATCH_PROCESSING)
            .with_description(format!("{batch_id} sub-batch {index}"))
            .with_estimate(Duration::from_secs(recipients.len() as u64));

        let inner = self.clone();
        let task_batch_id = batch_id.clone();
        let submitted = self.executor.submit_background(label, async move {
            let results = inner
                .processor
                .process(&task_batch_id, &kind, &recipients)
                .await;
            inner.complete_sub_batch(&task_batch_id, index, results);
            Ok(json!({
                "batch_id": task_batch_id,
                "sub_batch": index,
                "total_processed": results.total_processed,
            }))
        });

        match submitted {
            Ok(task_id) => {
                log_batch_operation(
                    "dispatch",
                    &batch_id,
                    "processing",
                    Some(index),
                    Some(&format!("task {task_id}")),
                );
                true
            }
            Err(e) => {
                error!(batch_id = %batch_id, error = %e, "BATCH: Sub-batch submission failed");
                let mut events = Vec::new();
                if let Some(job) = self.jobs.lock().get_mut(&batch_id) {
                    if job.status == BatchStatus::Processing {
                        transition(job, BatchStatus::Pending, now, &mut events);
                        job.last_processed_at = None;
                        job.last_error = Some(e.to_string());
                    }
                }
                for event in events {
                    self.publish(event);
                }
                false
            }
        }
    }

    /// Merge a finished sub-batch. Completions that no longer match the
    /// job's cursor are dropped.
    fn complete_sub_batch(&self, batch_id: &str, index: usize, results: BatchResults) {
        let now = Utc::now();
        let mut events = Vec::new();
        let status = {
            let mut jobs = self.jobs.lock();
            let Some(job) = jobs.get_mut(batch_id) else {
                warn!(batch_id = %batch_id, sub_batch = index, "BATCH: Completion for purged job dropped");
                return;
            };
            if job.current_sub_batch_index != index {
                warn!(
                    batch_id = %batch_id,
                    sub_batch = index,
                    cursor = job.current_sub_batch_index,
                    "BATCH: Stale sub-batch completion dropped"
                );
                return;
            }

            job.results.merge(&results);
            events.push(BatchEvent::SubBatchCompleted {
                batch_id: batch_id.to_string(),
                index,
                results,
            });

            match job.status {
                BatchStatus::Pending | BatchStatus::Processing => {
                    job.current_sub_batch_index += 1;
                    let next = if job.current_sub_batch_index == job.total_sub_batches() {
                        BatchStatus::Completed
                    } else {
                        BatchStatus::Pending
                    };
                    transition(job, next, now, &mut events);
                }
                // Late work on a failed job still counts, but the cursor stays
                BatchStatus::Failed | BatchStatus::Completed => {}
            }
            job.status
        };

        log_batch_operation(
            "sub_batch_complete",
            batch_id,
            &status.to_string(),
            Some(index),
            Some(&format!("{} recipients", results.total_processed)),
        );
        for event in events {
            self.publish(event);
        }
    }
}

fn transition(job: &mut BatchJob, to: BatchStatus, now: DateTime<Utc>, events: &mut Vec<BatchEvent>) {
    let from = job.status;
    if from == to {
        return;
    }
    debug_assert!(from.can_transition_to(to), "invalid batch transition {from} -> {to}");
    job.status = to;
    if to.is_terminal() {
        job.finished_at = Some(now);
    }
    events.push(BatchEvent::StatusChanged {
        batch_id: job.batch_id.clone(),
        from,
        to,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationConfig;
    use crate::execution::TaskRegistry;
    use crate::notifications::{LoggingChannel, MessageTemplates};

    fn coordinator() -> BatchCoordinator {
        let executor = Arc::new(TaskExecutor::new(Arc::new(TaskRegistry::new()), 4));
        let processor = Arc::new(SubBatchProcessor::new(
            Arc::new(LoggingChannel::new()),
            MessageTemplates::new(&NotificationConfig::default()),
        ));
        BatchCoordinator::new(BatchConfig::default(), executor, processor)
    }

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n)
            .map(|i| {
                Recipient::new(format!("s{i}"))
                    .with_phone(format!("+1555{i:04}"))
                    .with_email(format!("s{i}@example.edu"))
                    .with_credentials(format!("s{i}"), "pw")
            })
            .collect()
    }

    fn backdate(seconds: i64) -> impl FnOnce(&mut BatchJob) {
        move |job| {
            job.last_processed_at = Some(Utc::now() - chrono::Duration::seconds(seconds));
        }
    }

    #[tokio::test]
    async fn test_create_applies_defaults_and_prefix() {
        let coordinator = coordinator();
        let id = coordinator
            .create_credentials_batch(recipients(250), None, None)
            .unwrap();
        assert!(id.starts_with("credentials_"));

        let status = coordinator.get_batch_status(&id).unwrap();
        assert_eq!(status.total_sub_batches, 3);
        assert_eq!(status.interval_seconds, 180);
        assert_eq!(status.status, BatchStatus::Pending);

        assert!(matches!(
            coordinator.create_credentials_batch(Vec::new(), None, None),
            Err(NotifierError::InvalidInput(_))
        ));
        assert!(matches!(
            coordinator.create_credentials_batch(recipients(1), Some(0), None),
            Err(NotifierError::InvalidInput(_))
        ));
        assert!(matches!(
            coordinator.get_batch_status("nope"),
            Err(NotifierError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stalled_job_is_reset_to_pending() {
        let coordinator = coordinator();
        let id = coordinator
            .create_credentials_batch(recipients(3), Some(1), None)
            .unwrap();
        coordinator.with_job(&id, |job| job.status = BatchStatus::Processing);
        coordinator.with_job(&id, backdate(601));

        let summary = coordinator.tick();
        assert_eq!(summary.stalled, 1);
        assert_eq!(summary.dispatched, 0);

        let status = coordinator.get_batch_status(&id).unwrap();
        assert_eq!(status.status, BatchStatus::Pending);
        assert_eq!(status.retry_count, 1);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_retry_cap_fails_job_permanently() {
        let coordinator = coordinator();
        let id = coordinator
            .create_credentials_batch(recipients(2), Some(1), None)
            .unwrap();

        for cycle in 1..=3 {
            coordinator.with_job(&id, |job| job.status = BatchStatus::Processing);
            coordinator.with_job(&id, backdate(601));
            coordinator.tick();
            let status = coordinator.get_batch_status(&id).unwrap();
            assert_eq!(status.retry_count, cycle);
        }

        let status = coordinator.get_batch_status(&id).unwrap();
        assert_eq!(status.status, BatchStatus::Failed);
        assert!(status.finished_at.is_some());

        // Never scheduled again
        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(coordinator.tick_at(later).dispatched, 0);
        assert_eq!(coordinator.active_job_count(), 0);
    }

    #[tokio::test]
    async fn test_processing_job_is_not_dispatched_twice() {
        let coordinator = coordinator();
        let id = coordinator
            .create_credentials_batch(recipients(2), Some(1), Some(Duration::ZERO))
            .unwrap();
        coordinator.with_job(&id, |job| {
            job.status = BatchStatus::Processing;
            job.last_processed_at = Some(Utc::now());
        });

        assert_eq!(coordinator.tick().dispatched, 0);
        assert_eq!(
            coordinator.get_batch_status(&id).unwrap().current_sub_batch_index,
            0
        );
    }

    #[tokio::test]
    async fn test_stale_completion_is_dropped() {
        let coordinator = coordinator();
        let id = coordinator
            .create_credentials_batch(recipients(4), Some(2), None)
            .unwrap();
        coordinator.with_job(&id, |job| job.status = BatchStatus::Processing);

        let results = BatchResults {
            total_processed: 2,
            ..BatchResults::default()
        };
        coordinator.inner.complete_sub_batch(&id, 0, results);
        coordinator.inner.complete_sub_batch(&id, 0, results);

        let status = coordinator.get_batch_status(&id).unwrap();
        assert_eq!(status.current_sub_batch_index, 1);
        assert_eq!(status.results.total_processed, 2);
        assert_eq!(status.status, BatchStatus::Pending);
    }

    #[tokio::test]
    async fn test_late_completion_on_failed_job_merges_counts_only() {
        let coordinator = coordinator();
        let id = coordinator
            .create_credentials_batch(recipients(4), Some(2), None)
            .unwrap();
        coordinator.with_job(&id, |job| {
            job.status = BatchStatus::Failed;
            job.finished_at = Some(Utc::now());
        });

        let results = BatchResults {
            sms_queued: 2,
            total_processed: 2,
            ..BatchResults::default()
        };
        coordinator.inner.complete_sub_batch(&id, 0, results);

        let status = coordinator.get_batch_status(&id).unwrap();
        assert_eq!(status.status, BatchStatus::Failed);
        assert_eq!(status.current_sub_batch_index, 0);
        assert_eq!(status.results.sms_queued, 2);
    }

    #[tokio::test]
    async fn test_terminal_jobs_purged_after_retention() {
        let coordinator = coordinator();
        let id = coordinator
            .create_credentials_batch(recipients(1), None, None)
            .unwrap();
        let mut events = coordinator.subscribe();
        coordinator.with_job(&id, |job| {
            job.status = BatchStatus::Completed;
            job.finished_at = Some(Utc::now() - chrono::Duration::minutes(30));
        });

        assert_eq!(coordinator.tick().purged, 0);
        let summary = coordinator.tick_at(Utc::now() + chrono::Duration::minutes(31));
        assert_eq!(summary.purged, 1);
        assert!(coordinator.get_all_batches_status().is_empty());
        assert_eq!(
            events.recv().await.unwrap(),
            BatchEvent::Purged { batch_id: id }
        );
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid_state() {
        let coordinator = coordinator();
        coordinator.start_with_interval(Duration::from_millis(10)).unwrap();
        assert!(matches!(
            coordinator.start(),
            Err(NotifierError::InvalidState(_))
        ));
        coordinator.stop().await;
        assert!(!coordinator.is_running());
        coordinator.start_with_interval(Duration::from_millis(10)).unwrap();
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_zero_poll_interval_is_rejected() {
        let coordinator = coordinator();
        assert!(matches!(
            coordinator.start_with_interval(Duration::ZERO),
            Err(NotifierError::InvalidInput(_))
        ));
        assert!(!coordinator.is_running());

        let executor = Arc::new(TaskExecutor::new(Arc::new(TaskRegistry::new()), 1));
        let processor = Arc::new(SubBatchProcessor::new(
            Arc::new(LoggingChannel::new()),
            MessageTemplates::new(&NotificationConfig::default()),
        ));
        let config = BatchConfig {
            poll_interval_seconds: 0,
            ..BatchConfig::default()
        };
        let unvalidated = BatchCoordinator::new(config, executor, processor);
        assert!(matches!(
            unvalidated.start(),
            Err(NotifierError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_restarted_loop_still_dispatches_due_jobs() {
        let coordinator = coordinator();
        for round in 0..20 {
            coordinator.start_with_interval(Duration::from_millis(5)).unwrap();
            // Let the ticker become ready so stop can race a tick
            tokio::time::sleep(Duration::from_millis(6)).await;
            coordinator.stop().await;

            coordinator.start_with_interval(Duration::from_millis(5)).unwrap();
            let id = coordinator
                .create_credentials_batch(recipients(1), Some(1), Some(Duration::ZERO))
                .unwrap();

            let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
            loop {
                let status = coordinator.get_batch_status(&id).unwrap().status;
                if status == BatchStatus::Completed {
                    break;
                }
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "round {round}: restarted loop never dispatched, status {status}"
                );
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            coordinator.stop().await;
        }
    }

    #[tokio::test]
    async fn test_refused_submission_reverts_job_to_pending() {
        let coordinator = coordinator();
        let id = coordinator
            .create_credentials_batch(recipients(2), Some(1), Some(Duration::ZERO))
            .unwrap();
        let mut events = coordinator.subscribe();
        coordinator.inner.executor.shutdown();

        let summary = coordinator.tick();
        assert_eq!(summary.dispatched, 0);

        let status = coordinator.get_batch_status(&id).unwrap();
        assert_eq!(status.status, BatchStatus::Pending);
        assert_eq!(status.last_processed_at, None);
        assert_eq!(status.current_sub_batch_index, 0);
        assert!(status.last_error.is_some());

        assert!(matches!(
            events.recv().await.unwrap(),
            BatchEvent::StatusChanged { to: BatchStatus::Processing, .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            BatchEvent::StatusChanged { to: BatchStatus::Pending, .. }
        ));
    }

    #[tokio::test]
    async fn test_late_completion_after_stall_reset_completes_job() {
        let coordinator = coordinator();
        let id = coordinator
            .create_credentials_batch(recipients(2), Some(1), None)
            .unwrap();
        coordinator.with_job(&id, |job| {
            job.status = BatchStatus::Processing;
            job.current_sub_batch_index = 1;
        });
        coordinator.with_job(&id, backdate(601));
        assert_eq!(coordinator.tick().stalled, 1);
        assert_eq!(
            coordinator.get_batch_status(&id).unwrap().status,
            BatchStatus::Pending
        );

        // The slow sub-batch reports in after the reset
        let results = BatchResults {
            email_queued: 1,
            total_processed: 1,
            ..BatchResults::default()
        };
        coordinator.inner.complete_sub_batch(&id, 1, results);

        let status = coordinator.get_batch_status(&id).unwrap();
        assert_eq!(status.status, BatchStatus::Completed);
        assert_eq!(status.current_sub_batch_index, 2);
        assert_eq!(status.results.email_queued, 1);
        assert!(status.finished_at.is_some());
    }
}
