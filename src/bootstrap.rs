//! # Notifier System Bootstrap
//!
//! Builds every pipeline component exactly once and hands them out behind
//! `Arc`, so the hosting server owns one explicit instance of each instead of
//! reaching for process-wide globals.
//!
//! ## Lifecycle
//!
//! - [`NotifierSystem::bootstrap`] validates config and constructs components
//! - [`NotifierSystem::start`] starts the batch polling loop and the
//!   maintenance loop
//! - [`NotifierSystem::stop`] stops both loops, waits for in-flight tasks via
//!   the lifecycle manager and reports whether shutdown was clean

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::batch::{BatchCoordinator, SubBatchProcessor};
use crate::cache::{CacheStats, ResponseCache};
use crate::config::NotifierConfig;
use crate::database::{ConnectionFactory, ConnectionPool};
use crate::error::{NotifierError, Result};
use crate::execution::{ExecutorStats, TaskExecutor, TaskRegistry};
use crate::lifecycle::{LifecycleStats, WorkerLifecycleManager};
use crate::logging::get_environment;
use crate::notifications::{MessageTemplates, NotificationChannel};

/// Memoized read results shared by request handlers
pub type SharedResponseCache = ResponseCache<serde_json::Value>;

/// What one maintenance pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub registry_records_purged: usize,
    pub executor_results_purged: usize,
    pub cache_entries_expired: usize,
}

/// Status for health and dashboard endpoints
#[derive(Debug, Clone, Serialize)]
pub struct NotifierSystemStatus {
    pub running: bool,
    pub environment: String,
    pub active_batches: usize,
    pub executor: ExecutorStats,
    pub cache: CacheStats,
    pub lifecycle: LifecycleStats,
}

pub struct NotifierSystem {
    config: NotifierConfig,
    registry: Arc<TaskRegistry>,
    executor: Arc<TaskExecutor>,
    cache: Arc<SharedResponseCache>,
    coordinator: Arc<BatchCoordinator>,
    lifecycle: Arc<WorkerLifecycleManager>,
    running: AtomicBool,
    maintenance_loop: Mutex<Option<(JoinHandle<()>, Arc<Notify>)>>,
}

impl std::fmt::Debug for NotifierSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierSystem")
            .field("running", &self.is_running())
            .field("executor", &self.executor)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl NotifierSystem {
    /// Construct every component. Must be called from within a Tokio runtime.
    pub async fn bootstrap(
        config: NotifierConfig,
        channel: Arc<dyn NotificationChannel>,
    ) -> Result<Self> {
        info!("🚀 BOOTSTRAP: Starting notifier system bootstrap");
        config.validate()?;
        config.log_configuration();

        let registry = Arc::new(TaskRegistry::new());
        let executor = Arc::new(TaskExecutor::new(
            registry.clone(),
            config.executor.max_workers,
        ));
        let cache = Arc::new(ResponseCache::from_config(&config.cache));
        let processor = Arc::new(SubBatchProcessor::new(
            channel,
            MessageTemplates::new(&config.notifications),
        ));
        let coordinator = Arc::new(BatchCoordinator::new(
            config.batch.clone(),
            executor.clone(),
            processor,
        ));
        let lifecycle = Arc::new(WorkerLifecycleManager::from_config(
            registry.clone(),
            &config.lifecycle,
        ));

        info!("🎉 BOOTSTRAP: Notifier system bootstrap completed");
        Ok(Self {
            config,
            registry,
            executor,
            cache,
            coordinator,
            lifecycle,
            running: AtomicBool::new(false),
            maintenance_loop: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub fn cache(&self) -> &Arc<SharedResponseCache> {
        &self.cache
    }

    pub fn coordinator(&self) -> &Arc<BatchCoordinator> {
        &self.coordinator
    }

    pub fn lifecycle(&self) -> &Arc<WorkerLifecycleManager> {
        &self.lifecycle
    }

    /// Pool for a caller-supplied downstream resource, sized from config
    pub fn connection_pool<F: ConnectionFactory>(&self, factory: F) -> Arc<ConnectionPool<F>> {
        Arc::new(ConnectionPool::new(factory, &self.config.pool))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the batch polling loop and the maintenance loop.
    ///
    /// A system is not restartable: once [`NotifierSystem::stop`] has shut the
    /// executor down, starting again returns `InvalidState`.
    pub fn start(&self) -> Result<()> {
        if self.executor.is_shut_down() {
            return Err(NotifierError::InvalidState(
                "notifier system has been stopped and cannot be restarted".to_string(),
            ));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(NotifierError::InvalidState(
                "notifier system is already running".to_string(),
            ));
        }
        if let Err(e) = self.coordinator.start() {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let registry = self.registry.clone();
        let executor = self.executor.clone();
        let cache = self.cache.clone();
        let retention = self.config.registry.retention();
        let cleanup_interval = self.config.registry.cleanup_interval();
        let shutdown = Arc::new(Notify::new());
        let shutdown_notify = shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(cleanup_interval) => {
                        let report = run_maintenance(&registry, &executor, &cache, retention);
                        debug!(?report, "Maintenance cycle complete");
                    }
                    _ = shutdown_notify.notified() => {
                        info!("Maintenance loop shutting down");
                        break;
                    }
                }
            }
        });
        *self.maintenance_loop.lock() = Some((handle, shutdown));

        info!(
            environment = %get_environment(),
            "✅ BOOTSTRAP: Notifier system started"
        );
        Ok(())
    }

    /// One maintenance pass using the configured retention
    pub fn run_maintenance(&self) -> MaintenanceReport {
        run_maintenance(
            &self.registry,
            &self.executor,
            &self.cache,
            self.config.registry.retention(),
        )
    }

    /// Stop background loops and wait for in-flight tasks.
    ///
    /// Returns true for a clean shutdown. Queued work that never started is
    /// dropped when the executor's dispatchers stop. Stopping a system that
    /// is not running changes nothing and reports whether tasks are idle.
    pub async fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Notifier system is not running");
            return !self.registry.has_active_tasks();
        }

        self.coordinator.stop().await;
        let maintenance = self.maintenance_loop.lock().take();
        if let Some((handle, shutdown)) = maintenance {
            shutdown.notify_one();
            if let Err(e) = handle.await {
                warn!(error = %e, "Maintenance loop ended abnormally");
            }
        }

        let clean = self.lifecycle.shutdown().await;
        self.executor.shutdown();
        info!(clean = clean, "🛑 BOOTSTRAP: Notifier system stopped");
        clean
    }

    pub fn status(&self) -> NotifierSystemStatus {
        NotifierSystemStatus {
            running: self.is_running(),
            environment: get_environment(),
            active_batches: self.coordinator.active_job_count(),
            executor: self.executor.stats(),
            cache: self.cache.stats(),
            lifecycle: self.lifecycle.stats(),
        }
    }
}

fn run_maintenance(
    registry: &TaskRegistry,
    executor: &TaskExecutor,
    cache: &SharedResponseCache,
    retention: Duration,
) -> MaintenanceReport {
    MaintenanceReport {
        registry_records_purged: registry.cleanup_older_than(retention),
        executor_results_purged: executor.purge_results(retention),
        cache_entries_expired: cache.purge_expired(),
    }
}
