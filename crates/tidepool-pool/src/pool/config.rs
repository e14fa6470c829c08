//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tidepool_core::{PoolError, Result};

use crate::retry::RetryPolicy;

/// Configuration for a connection pool
///
/// Controls pool sizing, connection creation retries, checkout timeouts,
/// validation and orphan detection. Frozen once the pool starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of physical connections the pool keeps
    pool_size: usize,
    /// Attempts made to open one physical connection
    retry_count: u32,
    /// Pause in milliseconds between two creation attempts
    retry_delay_ms: u64,
    /// Default time in milliseconds a caller waits for a connection
    client_timeout_ms: u64,
    /// Whether connections are validated before being handed out
    validate_on_checkout: bool,
    /// Upper bound in milliseconds for one validation probe
    validation_timeout_ms: u64,
    /// Whether checked-out connections are tracked and reported when overdue
    detect_orphans: bool,
    /// Time in milliseconds after which a checked-out connection is an orphan
    orphan_timeout_ms: u64,
    /// Period in milliseconds of the orphan watchdog
    orphan_check_interval_ms: u64,
}

impl PoolConfig {
    /// Create a new pool configuration holding `pool_size` connections
    ///
    /// # Panics
    ///
    /// Panics if `pool_size` is 0.
    pub fn new(pool_size: usize) -> Self {
        assert!(
            pool_size > 0,
            "pool_size must be greater than 0, got {}",
            pool_size
        );

        Self {
            pool_size,
            retry_count: 10,
            retry_delay_ms: 1_000,
            client_timeout_ms: 10_000,
            validate_on_checkout: true,
            validation_timeout_ms: 10_000,
            detect_orphans: false,
            orphan_timeout_ms: 30_000,
            orphan_check_interval_ms: 1_000,
        }
    }

    /// Set the number of connections kept by the pool
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set how many attempts are made to open one connection
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Set the pause between connection attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = duration_ms(delay);
        self
    }

    /// Set the default checkout timeout
    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout_ms = duration_ms(timeout);
        self
    }

    /// Enable or disable validation on checkout
    pub fn with_validate_on_checkout(mut self, validate: bool) -> Self {
        self.validate_on_checkout = validate;
        self
    }

    /// Set the upper bound for one validation probe
    pub fn with_validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout_ms = duration_ms(timeout);
        self
    }

    /// Enable or disable orphan detection
    pub fn with_detect_orphans(mut self, detect: bool) -> Self {
        self.detect_orphans = detect;
        self
    }

    /// Set how long a connection may stay checked out before it is reported
    pub fn with_orphan_timeout(mut self, timeout: Duration) -> Self {
        self.orphan_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the period of the orphan watchdog
    pub fn with_orphan_check_interval(mut self, interval: Duration) -> Self {
        self.orphan_check_interval_ms = duration_ms(interval);
        self
    }

    /// Get the pool size
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Get the number of creation attempts
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Get the pause between creation attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Get the retry policy used to open connections
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_count, self.retry_delay())
    }

    /// Get the default checkout timeout
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    /// Whether connections are validated on checkout
    pub fn validate_on_checkout(&self) -> bool {
        self.validate_on_checkout
    }

    /// Get the validation probe timeout
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    /// Whether orphan detection is enabled
    pub fn detect_orphans(&self) -> bool {
        self.detect_orphans
    }

    /// Get the orphan timeout
    pub fn orphan_timeout(&self) -> Duration {
        Duration::from_millis(self.orphan_timeout_ms)
    }

    /// Get the orphan watchdog period
    pub fn orphan_check_interval(&self) -> Duration {
        Duration::from_millis(self.orphan_check_interval_ms)
    }

    /// Check the configuration before the pool starts
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(PoolError::Configuration(
                "pool_size must be greater than 0".into(),
            ));
        }
        if self.retry_count == 0 {
            return Err(PoolError::Configuration(
                "retry_count must be greater than 0".into(),
            ));
        }
        if self.detect_orphans && self.orphan_check_interval_ms == 0 {
            return Err(PoolError::Configuration(
                "orphan_check_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - pool_size: 10
    /// - retry: 10 attempts, 1 second apart
    /// - client_timeout: 10 seconds
    /// - validate_on_checkout: true, validation_timeout: 10 seconds
    /// - detect_orphans: false, orphan_timeout: 30 seconds
    /// - orphan_check_interval: 1 second
    fn default() -> Self {
        Self::new(10)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
