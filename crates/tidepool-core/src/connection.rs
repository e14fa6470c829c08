//! Connection traits consumed by the pool

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{QueryResult, Result, StatementResult, Value};

/// Handle for cancelling a running query from any thread.
///
/// The handle is safe to call from any thread and can be called multiple
/// times (subsequent calls are no-ops).
pub trait QueryCancelHandle: Send + Sync {
    /// Cancel the currently running query on the associated connection.
    fn cancel(&self);
}

/// A physical database session
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite", "postgresql", "mysql")
    fn driver_name(&self) -> &str;

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows (SELECT)
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Get the dialect identifier for this connection, if known
    fn dialect_id(&self) -> Option<&'static str> {
        None
    }

    /// Begin a transaction
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;

    /// Probe whether the session is still usable.
    ///
    /// `timeout` is a hint for drivers with a native liveness check; callers
    /// that need a hard bound enforce it themselves. The default reports a
    /// closed connection as invalid and otherwise runs the driver's ping query.
    async fn is_valid(&self, _timeout: Duration) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }
        self.query(ping_query(self.driver_name()), &[]).await?;
        Ok(true)
    }

    /// Get a handle that can be used to cancel running queries.
    ///
    /// Returns `None` if the driver does not support query cancellation.
    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        None
    }
}

/// A database transaction
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Execute a query within the transaction
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a statement within the transaction
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;
}

/// Opens physical connections to a single endpoint
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Open a new physical connection described by `connection_string`
    async fn create(&self, connection_string: &str) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self, connection_string: &str) -> Result<Arc<dyn Connection>> {
        (**self).create(connection_string).await
    }
}

/// Get the cheapest liveness query for a given driver.
///
/// - PostgreSQL, MySQL, SQLite, MS SQL: `SELECT 1`
/// - Oracle: `SELECT 1 FROM DUAL`
pub fn ping_query(driver_name: &str) -> &'static str {
    match driver_name {
        "oracle" => "SELECT 1 FROM DUAL",
        _ => "SELECT 1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PoolError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ProbeConnection {
        closed: AtomicBool,
        fail_queries: AtomicBool,
        queries: AtomicUsize,
    }

    impl ProbeConnection {
        fn new() -> Self {
            Self {
                closed: AtomicBool::new(false),
                fail_queries: AtomicBool::new(false),
                queries: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Connection for ProbeConnection {
        fn driver_name(&self) -> &str {
            "probe"
        }

        async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
            Ok(StatementResult::command(0))
        }

        async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
            assert_eq!(sql, "SELECT 1");
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.fail_queries.load(Ordering::SeqCst) {
                return Err(PoolError::Query("server went away".into()));
            }
            Ok(QueryResult::empty())
        }

        async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
            Err(PoolError::NotSupported("transactions".into()))
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_default_is_valid_pings_open_connection() {
        let conn = ProbeConnection::new();
        assert!(conn.is_valid(Duration::from_secs(1)).await.unwrap());
        assert_eq!(conn.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_is_valid_skips_ping_when_closed() {
        let conn = ProbeConnection::new();
        conn.close().await.unwrap();
        assert!(!conn.is_valid(Duration::from_secs(1)).await.unwrap());
        assert_eq!(conn.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_default_is_valid_propagates_ping_failure() {
        let conn = ProbeConnection::new();
        conn.fail_queries.store(true, Ordering::SeqCst);
        assert!(conn.is_valid(Duration::from_secs(1)).await.is_err());
    }

    #[test]
    fn test_ping_query_per_driver() {
        assert_eq!(ping_query("postgresql"), "SELECT 1");
        assert_eq!(ping_query("oracle"), "SELECT 1 FROM DUAL");
        assert_eq!(ping_query("unknown"), "SELECT 1");
    }
}
