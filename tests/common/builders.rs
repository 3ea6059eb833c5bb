use std::sync::Arc;
use std::time::Duration;

use batch_notify::batch::{BatchCoordinator, BatchStatusSnapshot, Recipient, SubBatchProcessor};
use batch_notify::config::{BatchConfig, NotificationConfig, NotifierConfig};
use batch_notify::execution::{TaskExecutor, TaskRegistry};
use batch_notify::notifications::{MessageTemplates, NotificationChannel};
use batch_notify::state_machine::BatchStatus;

/// Recipients with phone, email and login credentials
pub fn recipients(count: usize) -> Vec<Recipient> {
    (0..count)
        .map(|i| {
            Recipient::new(format!("Student {i}"))
                .with_phone(format!("+1555{i:06}"))
                .with_email(format!("student{i}@example.edu"))
                .with_credentials(format!("student{i}"), format!("pw-{i}"))
        })
        .collect()
}

pub fn phone_only(name: &str, phone: &str) -> Recipient {
    Recipient::new(name)
        .with_phone(phone)
        .with_credentials(name.to_lowercase(), "pw")
}

pub fn email_only(name: &str, email: &str) -> Recipient {
    Recipient::new(name).with_email(email)
}

/// Coordinator wired to a fresh executor and the given channel
pub fn coordinator_with(
    channel: Arc<dyn NotificationChannel>,
    config: BatchConfig,
) -> (Arc<BatchCoordinator>, Arc<TaskExecutor>) {
    let executor = Arc::new(TaskExecutor::new(
        Arc::new(TaskRegistry::new()),
        NotifierConfig::for_test().executor.max_workers,
    ));
    let processor = Arc::new(SubBatchProcessor::new(
        channel,
        MessageTemplates::new(&NotificationConfig::default()),
    ));
    let coordinator = Arc::new(BatchCoordinator::new(config, executor.clone(), processor));
    (coordinator, executor)
}

/// Poll until the job reaches `predicate` or `timeout` elapses
pub async fn wait_for_batch<P>(
    coordinator: &BatchCoordinator,
    batch_id: &str,
    timeout: Duration,
    predicate: P,
) -> BatchStatusSnapshot
where
    P: Fn(&BatchStatusSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = coordinator
            .get_batch_status(batch_id)
            .expect("batch should exist");
        if predicate(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("batch {batch_id} did not reach expected state in time: {snapshot:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until the in-flight sub-batch has been merged back to pending or completed
pub async fn wait_until_settled(
    coordinator: &BatchCoordinator,
    batch_id: &str,
) -> BatchStatusSnapshot {
    wait_for_batch(coordinator, batch_id, Duration::from_secs(5), |s| {
        s.status != BatchStatus::Processing
    })
    .await
}
