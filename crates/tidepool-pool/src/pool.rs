//! Fixed-size connection pooling
//!
//! This module provides a pool holding a fixed number of connections to a
//! single endpoint, with bounded waits on checkout, optional validation of
//! each connection before it is handed out and background replacement of
//! connections that turn out to be broken.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tidepool_pool::pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(5)
//!     .with_client_timeout(Duration::from_secs(5))
//!     .with_validate_on_checkout(true);
//!
//! let pool = ConnectionPool::with_config("postgres://localhost/app", factory, config);
//! pool.start()?;
//!
//! let conn = pool.get_connection().await?;
//! // Use connection...
//! conn.close().await?; // back to the pool
//! ```

mod config;
mod handle;
mod idle;
#[allow(clippy::module_inception)]
mod pool;
mod stats;


pub use config::PoolConfig;
pub use handle::{HandleId, PooledConnection};
pub use pool::ConnectionPool;
pub use stats::PoolStats;
