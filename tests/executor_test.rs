//! Task executor result retrieval and queue isolation

use futures::FutureExt;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use batch_notify::error::NotifierError;
use batch_notify::execution::{
    BoxedTask, TaskExecutor, TaskLabel, TaskRegistry, KIND_BATCH_PROCESSING, KIND_NOTIFICATION,
};

fn executor(max_workers: usize) -> TaskExecutor {
    TaskExecutor::new(Arc::new(TaskRegistry::new()), max_workers)
}

#[tokio::test]
async fn test_get_result_unknown_id_and_timeout() {
    let executor = executor(4);

    let err = executor
        .get_result("no-such-task", Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, NotifierError::NotFound(_)));

    let id = executor
        .submit_tracked(TaskLabel::new("slow_report"), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(json!("finished"))
        })
        .unwrap();
    let err = executor
        .get_result(&id, Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, NotifierError::Timeout { .. }));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_background_flood_does_not_starve_tracked_work() {
    let executor = executor(2);

    // Fill the background queue with more work than there are workers
    for _ in 0..6 {
        executor
            .submit_background(TaskLabel::new(KIND_NOTIFICATION), async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(json!(null))
            })
            .unwrap();
    }
    let tracked = executor
        .submit_tracked(TaskLabel::new("lookup"), async { Ok(json!("answer")) })
        .unwrap();

    // The tracked dispatcher competes for permits with the background one
    // instead of waiting behind the whole background queue
    let value = executor
        .get_result(&tracked, Duration::from_millis(80))
        .await
        .unwrap();
    assert_eq!(value, json!("answer"));
}

#[tokio::test]
async fn test_tracked_queue_is_fifo_with_single_worker() {
    let executor = executor(1);
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let ids: Vec<String> = (0..5)
        .map(|i| {
            let order = order.clone();
            executor
                .submit_tracked(TaskLabel::new("ordered"), async move {
                    order.lock().push(i);
                    Ok(json!(i))
                })
                .unwrap()
        })
        .collect();
    for id in &ids {
        executor.get_result(id, Duration::from_secs(1)).await.unwrap();
    }

    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_registry_drains_after_mixed_outcomes() {
    let executor = executor(3);
    let registry = executor.registry().clone();
    let finished = Arc::new(AtomicUsize::new(0));

    let mut tracked = Vec::new();
    for i in 0..9 {
        let finished = finished.clone();
        let label = TaskLabel::new(KIND_BATCH_PROCESSING).with_estimate(Duration::from_millis(10));
        let work = async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            finished.fetch_add(1, Ordering::SeqCst);
            if i % 3 == 0 {
                anyhow::bail!("unit {i} failed");
            }
            Ok(json!(i))
        };
        if i % 2 == 0 {
            tracked.push(executor.submit_tracked(label, work).unwrap());
        } else {
            executor.submit_background(label, work).unwrap();
        }
    }

    for id in &tracked {
        let _ = executor.get_result(id, Duration::from_secs(2)).await;
    }
    for _ in 0..200 {
        if finished.load(Ordering::SeqCst) == 9 && !registry.has_active_tasks() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(!registry.has_active_tasks());
    assert_eq!(registry.active_count(), 0);
    let counters = registry.counters();
    assert_eq!(counters.started, 9);
    assert_eq!(counters.failed, 3);
    assert_eq!(counters.completed, 6);
}

#[tokio::test]
async fn test_run_parallel_results_match_inputs() {
    let executor = executor(8);
    let works: Vec<BoxedTask> = (0..6u64)
        .map(|i| {
            async move {
                // Later inputs finish first
                tokio::time::sleep(Duration::from_millis(60 - i * 10)).await;
                Ok::<_, anyhow::Error>(json!(i * i))
            }
            .boxed()
        })
        .collect();

    let results = executor
        .run_parallel(TaskLabel::new("fan_out"), works, Duration::from_secs(2))
        .await;
    let expected: Vec<Option<serde_json::Value>> = (0..6u64).map(|i| Some(json!(i * i))).collect();
    assert_eq!(results, expected);
}

#[tokio::test]
async fn test_stats_reflect_submissions() {
    let executor = executor(4);
    let id = executor
        .submit_tracked(TaskLabel::new("a"), async { Ok(json!(1)) })
        .unwrap();
    executor
        .submit_background(TaskLabel::new("b"), async { Ok(json!(2)) })
        .unwrap();
    let handle = executor.submit_immediate(TaskLabel::new("c"), async { Ok(json!(3)) });
    handle.wait(Duration::from_secs(1)).await.unwrap();
    executor.get_result(&id, Duration::from_secs(1)).await.unwrap();

    let stats = executor.stats();
    assert_eq!(stats.max_workers, 4);
    assert_eq!(stats.tracked_submitted, 1);
    assert_eq!(stats.background_submitted, 1);
    assert_eq!(stats.immediate_submitted, 1);
    assert_eq!(stats.stored_results, 1);
}

#[tokio::test]
async fn test_submission_after_shutdown_is_rejected() {
    let executor = executor(2);
    executor.shutdown();
    assert!(executor.is_shut_down());

    // Refused at once, before the aborted dispatchers drop their receivers
    let result = executor.submit_tracked(TaskLabel::new("late"), async { Ok(json!(null)) });
    assert!(matches!(result, Err(NotifierError::InvalidState(_))));
    let result = executor.submit_background(TaskLabel::new("late"), async { Ok(json!(null)) });
    assert!(matches!(result, Err(NotifierError::InvalidState(_))));
}
