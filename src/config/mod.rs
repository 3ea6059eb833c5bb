//! # Notifier Configuration
//!
//! Typed configuration for every pipeline component. Values come from built-in
//! defaults, an optional TOML file and `NOTIFIER__`-prefixed environment
//! variables, in that order of precedence (see [`loader`]).
//!
//! ```rust,no_run
//! use batch_notify::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?;
//! let workers = config.executor.max_workers;
//! let spacing = config.batch.default_interval();
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::error::{NotifierError, Result};

pub use loader::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NotifierConfig {
    pub executor: ExecutorConfig,
    pub registry: RegistryConfig,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
    pub batch: BatchConfig,
    pub lifecycle: LifecycleConfig,
    pub notifications: NotificationConfig,
}

/// Worker pool sizing for the task executor
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_workers: 100 }
    }
}

/// Retention of finished task records
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub retention_seconds: u64,
    pub cleanup_interval_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retention_seconds: 24 * 60 * 60,
            cleanup_interval_seconds: 60 * 60,
        }
    }
}

impl RegistryConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
    pub default_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl_seconds: 300,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            acquire_timeout_ms: 5000,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Sub-batch sizing, pacing and retry policy for batch jobs
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    pub default_batch_size: usize,
    pub default_interval_seconds: u64,
    pub poll_interval_seconds: u64,
    pub processing_timeout_seconds: u64,
    pub max_retries: u32,
    pub retention_seconds: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 100,
            default_interval_seconds: 180,
            poll_interval_seconds: 30,
            processing_timeout_seconds: 600,
            max_retries: 3,
            retention_seconds: 60 * 60,
        }
    }
}

impl BatchConfig {
    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_seconds)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }
}

/// Graceful worker recycling timings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LifecycleConfig {
    pub recycling_delay_seconds: u64,
    pub max_wait_seconds: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            recycling_delay_seconds: 5,
            max_wait_seconds: 300,
        }
    }
}

impl LifecycleConfig {
    pub fn recycling_delay(&self) -> Duration {
        Duration::from_secs(self.recycling_delay_seconds)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_seconds)
    }
}

/// Values interpolated into outbound message templates
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    pub portal_base_url: String,
    pub organization_name: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            portal_base_url: "https://portal.example.edu".to_string(),
            organization_name: "Exam Portal".to_string(),
        }
    }
}

impl NotifierConfig {
    /// Test-optimized configuration with short timings
    pub fn for_test() -> Self {
        Self {
            executor: ExecutorConfig { max_workers: 8 },
            registry: RegistryConfig {
                retention_seconds: 60,
                cleanup_interval_seconds: 1,
            },
            cache: CacheConfig {
                max_size: 100,
                default_ttl_seconds: 1,
            },
            pool: PoolConfig {
                max_connections: 4,
                acquire_timeout_ms: 100,
            },
            batch: BatchConfig {
                default_batch_size: 100,
                default_interval_seconds: 1,
                poll_interval_seconds: 1,
                processing_timeout_seconds: 600,
                max_retries: 3,
                retention_seconds: 60 * 60,
            },
            lifecycle: LifecycleConfig {
                recycling_delay_seconds: 1,
                max_wait_seconds: 10,
            },
            notifications: NotificationConfig::default(),
        }
    }

    /// Reject values that would stall or divide by zero at runtime
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, bool); 8] = [
            ("executor.max_workers", self.executor.max_workers > 0),
            ("cache.max_size", self.cache.max_size > 0),
            ("pool.max_connections", self.pool.max_connections > 0),
            ("batch.default_batch_size", self.batch.default_batch_size > 0),
            ("batch.poll_interval_seconds", self.batch.poll_interval_seconds > 0),
            ("batch.processing_timeout_seconds", self.batch.processing_timeout_seconds > 0),
            ("lifecycle.recycling_delay_seconds", self.lifecycle.recycling_delay_seconds > 0),
            ("registry.cleanup_interval_seconds", self.registry.cleanup_interval_seconds > 0),
        ];

        if let Some((name, _)) = checks.iter().find(|(_, ok)| !ok) {
            return Err(NotifierError::Configuration(format!(
                "{name} must be greater than zero"
            )));
        }

        if self.batch.max_retries == 0 {
            return Err(NotifierError::Configuration(
                "batch.max_retries must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Log current configuration for debugging
    pub fn log_configuration(&self) {
        info!(
            max_workers = self.executor.max_workers,
            cache_max_size = self.cache.max_size,
            pool_max_connections = self.pool.max_connections,
            batch_size = self.batch.default_batch_size,
            batch_interval_s = self.batch.default_interval_seconds,
            poll_interval_s = self.batch.poll_interval_seconds,
            processing_timeout_s = self.batch.processing_timeout_seconds,
            max_retries = self.batch.max_retries,
            recycling_delay_s = self.lifecycle.recycling_delay_seconds,
            max_wait_s = self.lifecycle.max_wait_seconds,
            "⚙️ CONFIG: Notifier configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = NotifierConfig::default();
        assert_eq!(config.executor.max_workers, 100);
        assert_eq!(config.batch.default_batch_size, 100);
        assert_eq!(config.batch.default_interval(), Duration::from_secs(180));
        assert_eq!(config.batch.processing_timeout(), Duration::from_secs(600));
        assert_eq!(config.batch.max_retries, 3);
        assert_eq!(config.registry.retention(), Duration::from_secs(86_400));
        assert_eq!(config.lifecycle.recycling_delay(), Duration::from_secs(5));
        assert_eq!(config.lifecycle.max_wait(), Duration::from_secs(300));
        assert_eq!(config.pool.acquire_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_batch_size() {
        let mut config = NotifierConfig::for_test();
        config.batch.default_batch_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch.default_batch_size"));
    }

    #[test]
    fn test_validation_rejects_zero_retries() {
        let mut config = NotifierConfig::for_test();
        config.batch.max_retries = 0;
        assert!(matches!(
            config.validate(),
            Err(NotifierError::Configuration(_))
        ));
    }
}
