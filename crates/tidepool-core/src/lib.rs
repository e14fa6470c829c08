//! Tidepool Core - Connection abstractions shared by the pool
//!
//! This crate provides the traits and types the pool is written against.
//! It defines:
//!
//! - `Connection` - Trait for a physical database session
//! - `ConnectionFactory` - Trait for opening a physical session from a connection string
//! - `Transaction` - Trait for a transaction started on a connection
//! - Common types like `Value`, `Row`, `QueryResult` and the `PoolError` type

mod connection;
mod error;
mod types;

pub use connection::*;
pub use error::*;
pub use types::*;
