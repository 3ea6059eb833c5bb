//! # Batch Notifications
//!
//! Large recipient lists are split into fixed-size sub-batches and sent one
//! sub-batch at a time, spaced by a per-job interval, so third-party SMS and
//! email providers are never flooded.
//!
//! - [`job`] - job, recipient and result types plus partitioning
//! - [`processor`] - per-recipient delivery of one sub-batch
//! - [`coordinator`] - polling scheduler with stall recovery and retries

pub mod coordinator;
pub mod job;
pub mod processor;

pub use coordinator::{BatchCoordinator, BatchEvent, TickSummary};
pub use job::{
    partition, BatchJob, BatchResults, BatchStatusSnapshot, NotificationKind, Recipient,
    TestReference,
};
pub use processor::SubBatchProcessor;
