//! Pooled connection handle

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tidepool_core::{
    Connection, PoolError, QueryCancelHandle, QueryResult, Result, StatementResult, Transaction,
    Value,
};
use tokio::time::Instant;

use super::idle::IdleSlot;
use super::pool::PoolInner;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a pooled connection.
///
/// Assigned when a physical connection enters the pool and kept across every
/// checkout of that connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw identifier
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A connection checked out of the pool
///
/// Implements [`Connection`] by forwarding to the physical connection, except
/// for [`Connection::close`], which hands the connection back to the pool
/// instead of closing it. Dropping the handle without closing it also hands
/// it back.
pub struct PooledConnection {
    id: HandleId,
    connection: Arc<dyn Connection>,
    created_at: Instant,
    leased_at: Instant,
    pool: Arc<PoolInner>,
    released: AtomicBool,
}

impl PooledConnection {
    pub(crate) fn new(slot: IdleSlot, pool: Arc<PoolInner>) -> Self {
        Self {
            id: slot.id,
            connection: slot.connection,
            created_at: slot.created_at,
            leased_at: Instant::now(),
            pool,
            released: AtomicBool::new(false),
        }
    }

    /// Get the identity of this pooled connection
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// When this handle was checked out
    pub fn leased_at(&self) -> Instant {
        self.leased_at
    }

    /// How long this handle has been checked out
    pub fn held_for(&self) -> Duration {
        self.leased_at.elapsed()
    }

    /// Get the underlying physical connection
    pub fn inner(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    fn delegate(&self) -> Result<&Arc<dyn Connection>> {
        if self.released.load(Ordering::SeqCst) {
            return Err(PoolError::Connection(format!(
                "connection {} has already been returned to the pool",
                self.id
            )));
        }
        Ok(&self.connection)
    }

    fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            tracing::error!(handle = %self.id, "pooled connection closed more than once");
            return Err(PoolError::LeaseViolation(format!(
                "connection {} was closed more than once",
                self.id
            )));
        }
        self.pool.release(IdleSlot {
            id: self.id,
            connection: Arc::clone(&self.connection),
            created_at: self.created_at,
        })
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("driver", &self.connection.driver_name())
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl Connection for PooledConnection {
    fn driver_name(&self) -> &str {
        self.connection.driver_name()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.delegate()?.execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.delegate()?.query(sql, params).await
    }

    fn dialect_id(&self) -> Option<&'static str> {
        self.connection.dialect_id()
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.delegate()?.begin_transaction().await
    }

    /// Return the connection to the pool.
    ///
    /// Fails with [`PoolError::LeaseViolation`] if the handle was already
    /// returned.
    async fn close(&self) -> Result<()> {
        self.release()
    }

    fn is_closed(&self) -> bool {
        self.released.load(Ordering::SeqCst) || self.connection.is_closed()
    }

    async fn is_valid(&self, timeout: Duration) -> Result<bool> {
        self.delegate()?.is_valid(timeout).await
    }

    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        self.delegate().ok()?.cancel_handle()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            // Errors are already logged by the release path
            let _ = self.release();
        }
    }
}
