// State definitions for background tasks and batch notification jobs.

pub mod states;

pub use states::{BatchStatus, TaskState};
