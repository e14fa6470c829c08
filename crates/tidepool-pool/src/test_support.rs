//! Mock connections shared by the unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tidepool_core::{
    Connection, ConnectionFactory, PoolError, QueryResult, Result, StatementResult, Transaction,
    Value,
};

/// Mock connection whose liveness can be flipped from the test
pub(crate) struct MockConnection {
    #[allow(dead_code)]
    id: usize,
    closed: AtomicBool,
    valid: AtomicBool,
    probe_fails: AtomicBool,
    close_fails: AtomicBool,
    probe_delay: Duration,
}

impl MockConnection {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            probe_fails: AtomicBool::new(false),
            close_fails: AtomicBool::new(false),
            probe_delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    pub(crate) fn fail_probe(&self) {
        self.probe_fails.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_close(&self) {
        self.close_fails.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
        Ok(StatementResult::command(1))
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
        Ok(QueryResult::empty())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        Err(PoolError::NotSupported(
            "Transactions not supported in mock".into(),
        ))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.close_fails.load(Ordering::SeqCst) {
            return Err(PoolError::Connection("socket already gone".into()));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn is_valid(&self, _timeout: Duration) -> Result<bool> {
        if !self.probe_delay.is_zero() {
            tokio::time::sleep(self.probe_delay).await;
        }
        if self.probe_fails.load(Ordering::SeqCst) {
            return Err(PoolError::Query("probe failed".into()));
        }
        Ok(self.valid.load(Ordering::SeqCst) && !self.is_closed())
    }
}

/// Mock factory that counts and remembers every connection it opens
pub(crate) struct MockFactory {
    counter: AtomicUsize,
    failures_left: AtomicUsize,
    created: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockFactory {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            counter: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
        })
    }

    /// Make the next `n` calls to `create` fail
    pub(crate) fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub(crate) fn count(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    pub(crate) fn created(&self) -> Vec<Arc<MockConnection>> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn create(&self, connection_string: &str) -> Result<Arc<dyn Connection>> {
        assert_eq!(connection_string, "mock://test");
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(PoolError::Connection("connection refused".into()));
        }
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let conn = Arc::new(MockConnection::new(id));
        self.created.lock().push(Arc::clone(&conn));
        Ok(conn as Arc<dyn Connection>)
    }
}
