//! # Response Cache Module
//!
//! Bounded, TTL'd in-memory memoization for expensive reads. Entries expire
//! lazily on access and the least-recently-accessed entry is evicted when the
//! cache is full.

pub mod response_cache;

pub use response_cache::{CacheStats, ResponseCache};
