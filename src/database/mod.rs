//! # Downstream Connection Pooling
//!
//! Bounded reuse of connection handles to a downstream resource. The pool is
//! generic over a [`ConnectionFactory`], so the datastore client itself stays
//! an external collaborator.
//!
//! ```rust,no_run
//! use batch_notify::config::PoolConfig;
//! use batch_notify::database::{ConnectionFactory, ConnectionPool};
//! use batch_notify::error::Result;
//!
//! struct Dsn(String);
//!
//! #[async_trait::async_trait]
//! impl ConnectionFactory for Dsn {
//!     type Connection = String;
//!     async fn connect(&self) -> Result<String> {
//!         Ok(self.0.clone())
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let pool = ConnectionPool::new(Dsn("mongodb://localhost".into()), &PoolConfig::default());
//! let conn = pool.acquire().await?;
//! println!("using {}", *conn);
//! pool.release(conn).await;
//! # Ok(())
//! # }
//! ```

pub mod connection_pool;

pub use connection_pool::{ConnectionFactory, ConnectionPool, PoolStats, PooledConnection};
