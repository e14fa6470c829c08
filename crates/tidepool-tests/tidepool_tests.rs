//! Tidepool Pool Testing Suite
//!
//! Behavioural tests for the connection pool, driven through its public API
//! against an in-memory fake database. Tests are parameterized with rstest so
//! one definition runs with checkout validation and orphan tracking switched
//! on and off.
//!
//! # Test Categories
//!
//! - Acquire and release (bounded waits, FIFO hand-off, handle reuse)
//! - Validation on checkout (broken connections, slow probes, replenishment)
//! - Orphan detection (reporting, logging, no reclamation)
//! - Lifecycle (configure, start, stop, late returns)
//! - Concurrency (many workers sharing a small pool)
//!
//! # Usage
//!
//! ```bash
//! # Run all tests
//! cargo test -p tidepool-tests
//!
//! # Run specific test module
//! cargo test -p tidepool-tests orphan_tests
//!
//! # Show pool logs
//! RUST_LOG=tidepool_pool=debug cargo test -p tidepool-tests -- --nocapture
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core infrastructure
pub mod fixtures;

#[cfg(test)]
pub mod acquire_tests;

#[cfg(test)]
pub mod validation_tests;

#[cfg(test)]
pub mod orphan_tests;

#[cfg(test)]
pub mod lifecycle_tests;

#[cfg(test)]
pub mod concurrency_tests;
