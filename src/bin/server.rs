//! # Batch Notify Server
//!
//! Runs the notification pipeline as a standalone process: loads config,
//! starts the batch polling and maintenance loops, and on Ctrl+C or SIGTERM
//! waits for in-flight tasks before exiting.
//!
//! Exits 0 after a clean shutdown and 1 when tasks were still running at the
//! end of the recycling wait.

use std::sync::Arc;
use tracing::{error, info};

use batch_notify::bootstrap::NotifierSystem;
use batch_notify::config::ConfigLoader;
use batch_notify::lifecycle::WorkerLifecycleManager;
use batch_notify::logging::init_tracing;
use batch_notify::notifications::LoggingChannel;

#[tokio::main]
async fn main() {
    init_tracing();

    info!("🚀 Starting Batch Notify Server...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));

    let clean = match run().await {
        Ok(clean) => clean,
        Err(e) => {
            error!("Server failed: {}", e);
            false
        }
    };

    std::process::exit(WorkerLifecycleManager::exit_code(clean));
}

async fn run() -> batch_notify::error::Result<bool> {
    let config = ConfigLoader::load()?;
    let system = NotifierSystem::bootstrap(config, Arc::new(LoggingChannel::new())).await?;
    system.start()?;

    info!("🎉 Batch Notify Server started successfully!");
    info!("   Press Ctrl+C to shutdown gracefully");

    let signal = system.lifecycle().wait_for_termination_signal().await;
    info!(?signal, "🛑 Shutdown signal received, initiating graceful shutdown...");

    let clean = system.stop().await;
    info!(clean = clean, "👋 Batch Notify Server shutdown complete");
    Ok(clean)
}
