//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Statistics about a connection pool's current state
///
/// Provides insight into pool utilization and health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Total number of connections (idle + active)
    total: usize,
    /// Number of idle connections available in the pool
    idle: usize,
    /// Number of connections currently checked out
    active: usize,
    /// Number of callers waiting for a connection
    waiting: usize,
    /// Number of connection creations still in flight
    pending: usize,
    /// Connections opened since the pool started
    created: u64,
    /// Connections dropped because they failed validation
    discarded: u64,
    /// Creations that gave up after exhausting their retries
    creation_failures: u64,
    /// Overdue checkouts reported by the orphan watchdog
    orphans_reported: u64,
}

impl PoolStats {
    /// Create new pool statistics
    pub fn new(total: usize, idle: usize, active: usize, waiting: usize) -> Self {
        Self {
            total,
            idle,
            active,
            waiting,
            ..Self::default()
        }
    }

    /// Attach the number of creations still in flight
    pub fn with_pending(mut self, pending: usize) -> Self {
        self.pending = pending;
        self
    }

    /// Attach the lifetime connection counters
    pub fn with_lifetime_counters(
        mut self,
        created: u64,
        discarded: u64,
        creation_failures: u64,
    ) -> Self {
        self.created = created;
        self.discarded = discarded;
        self.creation_failures = creation_failures;
        self
    }

    /// Attach the number of orphans reported so far
    pub fn with_orphans_reported(mut self, orphans_reported: u64) -> Self {
        self.orphans_reported = orphans_reported;
        self
    }

    /// Get the total number of connections
    pub fn total(&self) -> usize {
        self.total
    }

    /// Get the number of idle connections
    pub fn idle(&self) -> usize {
        self.idle
    }

    /// Get the number of active (checked-out) connections
    pub fn active(&self) -> usize {
        self.active
    }

    /// Get the number of waiting callers
    pub fn waiting(&self) -> usize {
        self.waiting
    }

    /// Get the number of creations still in flight
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Get the number of connections opened since start
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Get the number of connections discarded by validation
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Get the number of creations that exhausted their retries
    pub fn creation_failures(&self) -> u64 {
        self.creation_failures
    }

    /// Get the number of orphans reported by the watchdog
    pub fn orphans_reported(&self) -> u64 {
        self.orphans_reported
    }

    /// Calculate pool utilization as a fraction (0.0 to 1.0)
    ///
    /// Returns 0.0 if total is 0 to avoid division by zero.
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.active as f64 / self.total as f64
        }
    }

    /// Check if the pool is fully utilized (all connections in use)
    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.total > 0
    }
}
