//! Graceful worker recycling.
//!
//! On a termination request the manager asks the [`TaskRegistry`] whether
//! background work is in flight and, if so, waits in `recycling_delay` steps
//! until the registry drains or `max_wait` runs out. It never kills running
//! tasks; a refused recycle is reported through a non-zero exit code.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::LifecycleConfig;
use crate::execution::TaskRegistry;

/// Which signal ended [`WorkerLifecycleManager::wait_for_termination_signal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    CtrlC,
    Terminate,
}

#[derive(Debug, Default)]
struct LifecycleCounters {
    recycling_requests: u64,
    delay_cycles: u64,
    refused_recycles: u64,
    last_delay_at: Option<DateTime<Utc>>,
}

/// Recycling statistics merged with the registry's task counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleStats {
    pub tasks_started: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub active_tasks: usize,
    pub recycling_requests: u64,
    pub delay_cycles: u64,
    pub refused_recycles: u64,
    pub last_delay_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct WorkerLifecycleManager {
    registry: Arc<TaskRegistry>,
    recycling_delay: Duration,
    max_wait: Duration,
    counters: Mutex<LifecycleCounters>,
}

impl WorkerLifecycleManager {
    pub fn new(registry: Arc<TaskRegistry>, recycling_delay: Duration, max_wait: Duration) -> Self {
        Self {
            registry,
            recycling_delay: recycling_delay.max(Duration::from_millis(1)),
            max_wait,
            counters: Mutex::new(LifecycleCounters::default()),
        }
    }

    pub fn from_config(registry: Arc<TaskRegistry>, config: &LifecycleConfig) -> Self {
        Self::new(registry, config.recycling_delay(), config.max_wait())
    }

    /// Wait for in-flight tasks to drain. Returns true when recycling is safe,
    /// false when `max_wait` elapsed with tasks still running.
    pub async fn request_recycling(&self) -> bool {
        self.counters.lock().recycling_requests += 1;

        if !self.registry.has_active_tasks() {
            info!("♻️ LIFECYCLE: No active tasks, recycling now");
            return true;
        }

        let started = Instant::now();
        let deadline = started + self.max_wait;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            {
                let mut counters = self.counters.lock();
                counters.delay_cycles += 1;
                counters.last_delay_at = Some(Utc::now());
            }
            info!(
                active_tasks = self.registry.active_count(),
                by_kind = ?self.registry.active_count_by_kind(),
                waited_s = started.elapsed().as_secs_f64(),
                "⏳ LIFECYCLE: Delaying recycle for in-flight tasks"
            );

            tokio::time::sleep_until((now + self.recycling_delay).min(deadline)).await;

            if !self.registry.has_active_tasks() {
                info!(
                    waited_ms = started.elapsed().as_millis() as u64,
                    "✅ LIFECYCLE: Tasks drained, recycling now"
                );
                return true;
            }
        }

        self.counters.lock().refused_recycles += 1;
        let active = self.registry.snapshot_active();
        error!(
            max_wait_s = self.max_wait.as_secs(),
            still_active = active.len(),
            "❌ LIFECYCLE: Tasks still running after max wait, refusing clean recycle"
        );
        for task in &active {
            warn!(
                task_id = %task.task_id,
                kind = %task.kind,
                description = %task.description,
                elapsed_s = task.elapsed.as_secs(),
                estimated_s = task.estimated_duration.map(|d| d.as_secs()),
                "LIFECYCLE: Still active"
            );
        }
        false
    }

    /// Ask-registry, wait-or-refuse shutdown. Returns whether it was clean.
    pub async fn shutdown(&self) -> bool {
        info!("🛑 LIFECYCLE: Shutdown requested");
        let clean = self.request_recycling().await;
        if clean {
            info!("👋 LIFECYCLE: Clean shutdown");
        } else {
            warn!("LIFECYCLE: Shutdown is not clean, in-flight tasks left running");
        }
        clean
    }

    /// Process exit code for a shutdown outcome
    pub fn exit_code(clean: bool) -> i32 {
        if clean {
            0
        } else {
            1
        }
    }

    /// Resolve on Ctrl+C or SIGTERM
    pub async fn wait_for_termination_signal(&self) -> TerminationSignal {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C");
                TerminationSignal::CtrlC
            },
            _ = terminate => {
                info!("Received SIGTERM");
                TerminationSignal::Terminate
            },
        }
    }

    pub fn stats(&self) -> LifecycleStats {
        let registry = self.registry.counters();
        let counters = self.counters.lock();
        LifecycleStats {
            tasks_started: registry.started,
            tasks_completed: registry.completed,
            tasks_failed: registry.failed,
            active_tasks: self.registry.active_count(),
            recycling_requests: counters.recycling_requests,
            delay_cycles: counters.delay_cycles,
            refused_recycles: counters.refused_recycles,
            last_delay_at: counters.last_delay_at,
        }
    }
}
