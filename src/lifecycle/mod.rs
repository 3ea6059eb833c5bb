//! # Worker Lifecycle
//!
//! Defers process recycling while background tasks are in flight.

pub mod worker_manager;

pub use worker_manager::{LifecycleStats, TerminationSignal, WorkerLifecycleManager};
