//! Shared helpers for integration tests
#![allow(dead_code)]

pub mod builders;
pub mod mock_channel;
pub mod strategies;
