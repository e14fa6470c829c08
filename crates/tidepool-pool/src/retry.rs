//! Bounded retry for connection creation
//!
//! The pool never opens a physical connection just once: every creation goes
//! through a [`RetryPolicy`] that repeats the attempt a fixed number of times
//! with a fixed pause in between.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tidepool_pool::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::new(10, Duration::from_secs(1));
//! let conn = policy.retry(|| factory.create("sqlite::memory:")).await?;
//! ```

mod policy;

#[cfg(test)]
mod tests;

pub use policy::RetryPolicy;
