//! Orphan detection for checked-out connections
//!
//! When enabled, every checkout is recorded as a lease carrying a deadline and
//! the call stack of the caller. A watchdog task wakes periodically, looks at
//! the lease closest to its deadline and logs every lease that is overdue.
//! Orphans are reported, never reclaimed; the pool simply runs with fewer
//! idle connections until they are returned.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//!
//! pool.configure(|config| {
//!     config
//!         .with_detect_orphans(true)
//!         .with_orphan_timeout(Duration::from_secs(1))
//! })?;
//! pool.start()?;
//!
//! let conn = pool.get_connection().await?;
//! tokio::time::sleep(Duration::from_secs(3)).await;
//! assert_eq!(pool.orphans().len(), 1);
//! ```

mod lease;
mod watchdog;


pub use lease::OrphanReport;
pub(crate) use lease::{Lease, LeaseSet};
pub(crate) use watchdog::OrphanWatchdog;
