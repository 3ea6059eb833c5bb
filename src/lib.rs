#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Batch Notify Core
//!
//! In-process background task execution and paced batch notification delivery
//! for an exam administration backend.
//!
//! ## Overview
//!
//! Large notification campaigns ("notify 5,000 students about test X") are
//! split into fixed-size sub-batches and sent one sub-batch per interval so
//! third-party SMS and email providers are not flooded. Sub-batches run on a
//! bounded worker pool, every running unit of work is tracked in a registry,
//! and worker recycling is deferred while that registry reports work in flight.
//!
//! ## Module Organization
//!
//! - [`execution`] - task registry and bounded executor with tracked,
//!   background and immediate submission
//! - [`batch`] - recipient partitioning, sub-batch delivery and the polling
//!   coordinator with stall recovery
//! - [`lifecycle`] - graceful worker recycling on termination signals
//! - [`cache`] - bounded TTL response cache with LRU eviction
//! - [`database`] - bounded connection pool with overflow handles
//! - [`notifications`] - SMS/email channel boundary and message templates
//! - [`bootstrap`] - builds and owns one instance of every component
//! - [`config`] - layered configuration
//! - [`error`] - structured error handling
//! - [`logging`] - tracing subscriber setup and structured log helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use batch_notify::batch::Recipient;
//! use batch_notify::bootstrap::NotifierSystem;
//! use batch_notify::config::NotifierConfig;
//! use batch_notify::notifications::LoggingChannel;
//!
//! # async fn example() -> batch_notify::error::Result<()> {
//! let system = NotifierSystem::bootstrap(
//!     NotifierConfig::default(),
//!     Arc::new(LoggingChannel::new()),
//! )
//! .await?;
//! system.start()?;
//!
//! let recipients = vec![Recipient::new("Ada")
//!     .with_email("ada@example.edu")
//!     .with_phone("+15550100")
//!     .with_credentials("ada", "initial-pass")];
//! let batch_id = system
//!     .coordinator()
//!     .create_credentials_batch(recipients, None, None)?;
//! println!("{:?}", system.coordinator().get_batch_status(&batch_id)?);
//!
//! let clean = system.stop().await;
//! # let _ = clean;
//! # Ok(())
//! # }
//! ```
//!
//! ## State
//!
//! All task, job, cache and pool state is in memory and lost on restart.
//! Delivery is best-effort and at-least-once: a sub-batch that stalls is
//! retried from its start.

pub mod batch;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod execution;
pub mod lifecycle;
pub mod logging;
pub mod notifications;
pub mod state_machine;

pub use bootstrap::NotifierSystem;
pub use config::NotifierConfig;
pub use error::{NotifierError, Result};
