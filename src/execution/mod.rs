//! # Background Task Execution
//!
//! - [`registry`] - bookkeeping of running tasks, consulted before worker recycling
//! - [`executor`] - bounded worker pool with tracked, background and immediate submission
//! - [`types`] - labels, results and statistics shared by both

pub mod executor;
pub mod registry;
pub mod types;

pub use executor::{TaskExecutor, TaskHandle};
pub use registry::{ActiveTaskDetail, RegistryCounters, TaskOutcome, TaskRecord, TaskRegistry};
pub use types::{
    BoxedTask, ExecutorStats, TaskLabel, TaskResult, TaskValue, KIND_BATCH_PROCESSING,
    KIND_NOTIFICATION,
};
