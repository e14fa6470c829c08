//! Error types for tidepool

use std::time::Duration;

use thiserror::Error;

/// Core error type for tidepool operations
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No idle connection became available within the caller's timeout
    #[error("There are no available connections in the pool (waited {timeout:?})")]
    NoAvailableConnections { timeout: Duration },

    /// A handle was released without a matching lease, e.g. closed twice
    #[error("Lease violation: {0}")]
    LeaseViolation(String),

    #[error("Pool is not running")]
    NotRunning,

    #[error("Gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<PoolError>,
    },

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl PoolError {
    /// Whether the caller can reasonably try the same operation again later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PoolError::NoAvailableConnections { .. }
                | PoolError::Connection(_)
                | PoolError::Timeout(_)
        )
    }
}

/// Result type alias for tidepool operations
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_message() {
        let err = PoolError::NoAvailableConnections {
            timeout: Duration::from_millis(50),
        };
        assert_eq!(
            err.to_string(),
            "There are no available connections in the pool (waited 50ms)"
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_retry_exhausted_keeps_source() {
        use std::error::Error as _;

        let err = PoolError::RetryExhausted {
            attempts: 3,
            source: Box::new(PoolError::Connection("refused".into())),
        };
        assert_eq!(
            err.to_string(),
            "Gave up after 3 attempts: Connection error: refused"
        );
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "Connection error: refused");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_lease_violation_is_not_transient() {
        let err = PoolError::LeaseViolation("closed twice".into());
        assert!(!err.is_transient());
        assert!(err.to_string().starts_with("Lease violation"));
    }
}
