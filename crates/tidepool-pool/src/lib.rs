//! Tidepool Pool - Fixed-size connection pooling
//!
//! This crate keeps a fixed number of physical connections to one endpoint
//! ready for checkout, validates them on the way out, replaces broken ones in
//! the background and can report connections that are never handed back.

pub mod orphan;
pub mod pool;
pub mod retry;
mod validate;

#[cfg(test)]
pub(crate) mod test_support;

pub use orphan::OrphanReport;
pub use pool::{ConnectionPool, HandleId, PoolConfig, PoolStats, PooledConnection};
pub use retry::RetryPolicy;
pub use validate::is_valid;
