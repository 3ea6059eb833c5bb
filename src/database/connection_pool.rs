//! Bounded connection pool with timeout-driven overflow.
//!
//! Pooled checkouts are capped by a semaphore of `max_connections` permits.
//! When no permit frees up within the acquire timeout the caller still gets a
//! connection: a temporary overflow handle that is closed on release instead
//! of being pooled.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::Result;

/// Opens and closes connections to the downstream resource
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection>;

    /// Close a connection the pool no longer wants. Dropping it is the default.
    async fn close(&self, connection: Self::Connection) {
        drop(connection);
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    live: AtomicUsize,
    created: AtomicU64,
    closed: AtomicU64,
    overflow_created: AtomicU64,
    acquire_timeouts: AtomicU64,
}

/// Connection checked out of a [`ConnectionPool`].
///
/// Hand it back with [`ConnectionPool::release`]. A handle dropped without
/// release frees its slot but its connection is dropped rather than reused.
pub struct PooledConnection<C> {
    connection: Option<C>,
    permit: Option<OwnedSemaphorePermit>,
    counters: Arc<PoolCounters>,
}

impl<C> PooledConnection<C> {
    /// True for handles created past capacity after an acquire timeout
    pub fn is_overflow(&self) -> bool {
        self.permit.is_none()
    }
}

impl<C> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("overflow", &self.is_overflow())
            .finish()
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        match &self.connection {
            Some(connection) => connection,
            None => unreachable!("connection is only taken on release"),
        }
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        match &mut self.connection {
            Some(connection) => connection,
            None => unreachable!("connection is only taken on release"),
        }
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if self.connection.take().is_some() {
            self.counters.live.fetch_sub(1, Ordering::Relaxed);
            warn!(
                overflow = self.is_overflow(),
                "POOL: Connection dropped without release"
            );
        }
    }
}

/// Pool counters for dashboards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_connections: usize,
    pub live: usize,
    pub idle: usize,
    pub checked_out: usize,
    pub created: u64,
    pub closed: u64,
    pub overflow_created: u64,
    pub acquire_timeouts: u64,
}

pub struct ConnectionPool<F: ConnectionFactory> {
    factory: F,
    idle: Mutex<Vec<F::Connection>>,
    permits: Arc<Semaphore>,
    max_connections: usize,
    acquire_timeout: Duration,
    counters: Arc<PoolCounters>,
}

impl<F: ConnectionFactory> std::fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    pub fn new(factory: F, config: &PoolConfig) -> Self {
        let max_connections = config.max_connections.max(1);
        info!(
            max_connections = max_connections,
            acquire_timeout_ms = config.acquire_timeout_ms,
            "🔌 POOL: Connection pool created"
        );
        Self {
            factory,
            idle: Mutex::new(Vec::with_capacity(max_connections)),
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            acquire_timeout: config.acquire_timeout(),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Check out a connection.
    ///
    /// Reuses an idle connection when one exists, opens a new one while under
    /// capacity, and otherwise waits up to the acquire timeout for a release.
    /// If that wait expires, an overflow connection is opened instead of
    /// failing. Only factory errors are returned.
    pub async fn acquire(&self) -> Result<PooledConnection<F::Connection>> {
        let permit =
            match tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
                .await
            {
                Ok(Ok(permit)) => Some(permit),
                Ok(Err(_)) => None,
                Err(_) => {
                    self.counters.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
                    None
                }
            };

        let Some(permit) = permit else {
            let connection = self.open().await?;
            self.counters.overflow_created.fetch_add(1, Ordering::Relaxed);
            warn!(
                max_connections = self.max_connections,
                timeout_ms = self.acquire_timeout.as_millis() as u64,
                "⚠️ POOL: Acquire timed out, created overflow connection"
            );
            return Ok(self.handle(connection, None));
        };

        let reused = self.idle.lock().pop();
        let connection = match reused {
            Some(connection) => connection,
            // On failure the permit drops here, freeing the slot
            None => self.open().await?,
        };
        Ok(self.handle(connection, Some(permit)))
    }

    /// Return a connection. Pooled handles go back to the idle list while it
    /// has room; overflow handles are always closed.
    pub async fn release(&self, mut handle: PooledConnection<F::Connection>) {
        let Some(connection) = handle.connection.take() else {
            return;
        };
        let permit = handle.permit.take();
        let overflow = permit.is_none();

        let rejected = if overflow {
            Some(connection)
        } else {
            let mut idle = self.idle.lock();
            if idle.len() < self.max_connections {
                idle.push(connection);
                None
            } else {
                Some(connection)
            }
        };
        drop(permit);

        if let Some(connection) = rejected {
            self.factory.close(connection).await;
            self.counters.live.fetch_sub(1, Ordering::Relaxed);
            self.counters.closed.fetch_add(1, Ordering::Relaxed);
            debug!(overflow = overflow, "POOL: Connection closed on release");
        }
    }

    /// Close every idle connection
    pub async fn close_idle(&self) -> usize {
        let drained: Vec<F::Connection> = std::mem::take(&mut *self.idle.lock());
        let count = drained.len();
        for connection in drained {
            self.factory.close(connection).await;
        }
        self.counters.live.fetch_sub(count, Ordering::Relaxed);
        self.counters
            .closed
            .fetch_add(count as u64, Ordering::Relaxed);
        if count > 0 {
            info!(closed = count, "🔌 POOL: Idle connections closed");
        }
        count
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_connections: self.max_connections,
            live: self.counters.live.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
            checked_out: self.max_connections - self.permits.available_permits(),
            created: self.counters.created.load(Ordering::Relaxed),
            closed: self.counters.closed.load(Ordering::Relaxed),
            overflow_created: self.counters.overflow_created.load(Ordering::Relaxed),
            acquire_timeouts: self.counters.acquire_timeouts.load(Ordering::Relaxed),
        }
    }

    async fn open(&self) -> Result<F::Connection> {
        let connection = self.factory.connect().await?;
        self.counters.live.fetch_add(1, Ordering::Relaxed);
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        Ok(connection)
    }

    fn handle(
        &self,
        connection: F::Connection,
        permit: Option<OwnedSemaphorePermit>,
    ) -> PooledConnection<F::Connection> {
        PooledConnection {
            connection: Some(connection),
            permit,
            counters: self.counters.clone(),
        }
    }
}
