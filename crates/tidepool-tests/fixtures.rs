//! Core test fixtures for parameterized pool testing.
//!
//! This module provides an in-memory fake database whose connections can be
//! broken, slowed down or made to refuse new connections from a test, plus
//! helpers that build and start pools in the modes the suite runs against.
//!
//! # Architecture
//!
//! Tests use the [`PoolMode`] enum to pick which optional pool features are
//! switched on. [`test_pool`] starts a pool against a fresh [`FakeDatabase`]
//! and waits until every connection has been opened, so a test starts from a
//! full idle queue.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tidepool_tests::fixtures::{PoolMode, test_pool};
//! use rstest::rstest;
//!
//! #[rstest]
//! #[case::plain(PoolMode::Plain)]
//! #[case::validating(PoolMode::Validating)]
//! #[tokio::test]
//! async fn test_checkout(#[case] mode: PoolMode) -> anyhow::Result<()> {
//!     let (pool, _db) = test_pool(mode, 2).await?;
//!     let conn = pool.get_connection().await?;
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use tidepool_core::{
    Connection, ConnectionFactory, PoolError, QueryResult, Row, StatementResult, Transaction,
    Value,
};
use tidepool_pool::{ConnectionPool, PoolConfig};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

/// Connection string every fake connection is opened against
pub const FAKE_URL: &str = "fake://tidepool/test";

/// Which optional pool features a test runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolMode {
    /// No validation, no orphan tracking
    Plain,
    /// Connections validated on checkout
    Validating,
    /// Validation plus orphan tracking
    Tracking,
}

impl PoolMode {
    /// Build the pool configuration for this mode
    pub fn config(&self, pool_size: usize) -> PoolConfig {
        let config = PoolConfig::new(pool_size)
            .with_retry_count(3)
            .with_retry_delay(Duration::from_millis(10))
            .with_client_timeout(Duration::from_secs(1))
            .with_validation_timeout(Duration::from_millis(200));

        match self {
            PoolMode::Plain => config.with_validate_on_checkout(false),
            PoolMode::Validating => config.with_validate_on_checkout(true),
            PoolMode::Tracking => config
                .with_validate_on_checkout(true)
                .with_detect_orphans(true)
                .with_orphan_timeout(Duration::from_millis(200))
                .with_orphan_check_interval(Duration::from_millis(20)),
        }
    }

    /// Check whether connections are validated on checkout
    pub fn validates(&self) -> bool {
        !matches!(self, PoolMode::Plain)
    }

    /// Check whether checkouts are tracked for orphan detection
    pub fn tracks_orphans(&self) -> bool {
        matches!(self, PoolMode::Tracking)
    }
}

/// Get every pool mode
pub fn all_modes() -> Vec<PoolMode> {
    vec![PoolMode::Plain, PoolMode::Validating, PoolMode::Tracking]
}

/// A connection to the fake database
pub struct FakeConnection {
    serial: usize,
    closed: AtomicBool,
    broken: AtomicBool,
    probe_delay: Mutex<Duration>,
    queries: AtomicUsize,
}

impl FakeConnection {
    fn new(serial: usize) -> Self {
        Self {
            serial,
            closed: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            probe_delay: Mutex::new(Duration::ZERO),
            queries: AtomicUsize::new(0),
        }
    }

    /// Order in which the database opened this connection, starting at 0
    pub fn serial(&self) -> usize {
        self.serial
    }

    /// Make every probe and query on this connection fail
    pub fn break_connection(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Make liveness probes take `delay`
    pub fn slow_down(&self, delay: Duration) {
        *self.probe_delay.lock() = delay;
    }

    /// Number of statements run on this connection
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn check(&self) -> tidepool_core::Result<()> {
        if self.is_closed() {
            return Err(PoolError::Connection("connection is closed".into()));
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(PoolError::Connection("server closed the connection".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn driver_name(&self) -> &str {
        "fake"
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> tidepool_core::Result<StatementResult> {
        self.check()?;
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(StatementResult::command(1))
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> tidepool_core::Result<QueryResult> {
        self.check()?;
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.probe_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let row = Row::new(vec!["?column?".into()], vec![Value::Int64(1)]);
        Ok(QueryResult {
            columns: vec!["?column?".into()],
            rows: vec![row],
            ..QueryResult::default()
        })
    }

    async fn begin_transaction(&self) -> tidepool_core::Result<Box<dyn Transaction>> {
        Err(PoolError::NotSupported(
            "Transactions not supported by the fake database".into(),
        ))
    }

    async fn close(&self) -> tidepool_core::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// In-memory database that hands out [`FakeConnection`]s
#[derive(Default)]
pub struct FakeDatabase {
    refusals_left: AtomicUsize,
    attempts: AtomicUsize,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeDatabase {
    /// Create a database that accepts every connection
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse the next `n` connection attempts
    pub fn refuse_next(&self, n: usize) {
        self.refusals_left.store(n, Ordering::SeqCst);
    }

    /// Number of connection attempts, refused or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Every connection opened so far, oldest first
    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.connections.lock().clone()
    }

    /// The connection opened in position `serial`
    pub fn connection(&self, serial: usize) -> Result<Arc<FakeConnection>> {
        match self.connections.lock().get(serial) {
            Some(conn) => Ok(Arc::clone(conn)),
            None => bail!("no connection with serial {serial}"),
        }
    }

    /// Number of connections opened and not yet closed
    pub fn open_connections(&self) -> usize {
        self.connections
            .lock()
            .iter()
            .filter(|conn| !conn.is_closed())
            .count()
    }
}

#[async_trait]
impl ConnectionFactory for FakeDatabase {
    async fn create(&self, connection_string: &str) -> tidepool_core::Result<Arc<dyn Connection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if connection_string != FAKE_URL {
            return Err(PoolError::Connection(format!(
                "unknown database: {connection_string}"
            )));
        }
        let refused = self
            .refusals_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(PoolError::Connection("connection refused".into()));
        }

        let mut connections = self.connections.lock();
        let conn = Arc::new(FakeConnection::new(connections.len()));
        connections.push(Arc::clone(&conn));
        Ok(conn as Arc<dyn Connection>)
    }
}

/// Create an unstarted pool over a fresh fake database
pub fn unstarted_pool(config: PoolConfig) -> (Arc<ConnectionPool>, Arc<FakeDatabase>) {
    initialize_logging();
    let db = FakeDatabase::new();
    let pool = Arc::new(ConnectionPool::with_config(FAKE_URL, Arc::clone(&db), config));
    (pool, db)
}

/// Start a pool in `mode` and wait until all `pool_size` connections are idle
pub async fn test_pool(
    mode: PoolMode,
    pool_size: usize,
) -> Result<(Arc<ConnectionPool>, Arc<FakeDatabase>)> {
    let (pool, db) = unstarted_pool(mode.config(pool_size));
    pool.start()?;
    wait_for_idle(&pool, pool_size).await?;
    Ok((pool, db))
}

/// Wait until the pool reports `expected` idle connections
pub async fn wait_for_idle(pool: &ConnectionPool, expected: usize) -> Result<()> {
    for _ in 0..400 {
        if pool.stats().idle() == expected {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bail!(
        "expected {expected} idle connections, pool reports {:?}",
        pool.stats()
    )
}

/// Wait until no connection creation is in flight
pub async fn wait_until_settled(pool: &ConnectionPool) -> Result<()> {
    for _ in 0..400 {
        if pool.stats().pending() == 0 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bail!("connection creations did not settle: {:?}", pool.stats())
}

/// Log sink that keeps everything written to it
///
/// Installed as the thread default subscriber, so it only sees events from
/// tasks polled on the test thread.
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Create an empty capture
    pub fn new() -> Self {
        Self::default()
    }

    /// Route events on this thread into the capture until the guard drops
    pub fn install(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Everything captured so far
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    /// Number of captured lines containing `needle`
    pub fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Initialize logging for tests if not already initialized
///
/// This sets up tracing with appropriate filters for test output.
fn initialize_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tidepool_pool=info"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_mode_properties() {
        assert!(!PoolMode::Plain.validates());
        assert!(PoolMode::Validating.validates());
        assert!(PoolMode::Tracking.validates());

        assert!(!PoolMode::Plain.tracks_orphans());
        assert!(!PoolMode::Validating.tracks_orphans());
        assert!(PoolMode::Tracking.tracks_orphans());

        for mode in all_modes() {
            assert!(mode.config(2).validate().is_ok());
            assert_eq!(mode.config(2).validate_on_checkout(), mode.validates());
            assert_eq!(mode.config(2).detect_orphans(), mode.tracks_orphans());
        }
    }

    #[tokio::test]
    async fn test_fake_database_refusals() {
        let db = FakeDatabase::new();
        db.refuse_next(1);

        assert!(db.create(FAKE_URL).await.is_err());
        assert!(db.create(FAKE_URL).await.is_ok());
        assert!(db.create("fake://elsewhere").await.is_err());
        assert_eq!(db.attempts(), 3);
        assert_eq!(db.connections().len(), 1);
    }

    #[tokio::test]
    async fn test_broken_connection_fails_queries() {
        let db = FakeDatabase::new();
        let conn = db.create(FAKE_URL).await.expect("connect");
        assert!(conn.is_valid(Duration::from_secs(1)).await.expect("probe"));

        db.connection(0).expect("opened").break_connection();
        assert!(conn.query("SELECT 1", &[]).await.is_err());
        assert!(conn.is_valid(Duration::from_secs(1)).await.is_err());
    }
}
