//! Connection pool implementation

use std::backtrace::Backtrace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tidepool_core::{ConnectionFactory, PoolError, Result};
use tokio::time::Instant;

use super::config::PoolConfig;
#[cfg(test)]
use super::handle::HandleId;
use super::handle::PooledConnection;
use super::idle::{Checkout, IdleQueue, IdleSlot, close_quietly};
use super::stats::PoolStats;
use crate::orphan::{Lease, LeaseSet, OrphanReport, OrphanWatchdog};
use crate::validate;

/// Where the pool is in its start/stop lifecycle
enum Lifecycle {
    /// Created, accepting configuration
    Configuring(PoolConfig),
    /// Started; configuration is frozen
    Running {
        inner: Arc<PoolInner>,
        watchdog: Option<OrphanWatchdog>,
    },
    /// Stopped for good
    Stopped(PoolConfig),
}

impl Lifecycle {
    fn config(&self) -> &PoolConfig {
        match self {
            Lifecycle::Configuring(config) | Lifecycle::Stopped(config) => config,
            Lifecycle::Running { inner, .. } => &inner.config,
        }
    }
}

/// A fixed-size pool of connections to a single endpoint
///
/// `start` opens the configured number of connections in the background.
/// Callers borrow them with [`ConnectionPool::get_connection`] and give them
/// back by closing (or dropping) the returned [`PooledConnection`].
pub struct ConnectionPool {
    /// Endpoint every connection is opened against
    connection_string: String,
    /// Connection factory
    factory: Arc<dyn ConnectionFactory>,
    /// Lifecycle state
    state: Mutex<Lifecycle>,
}

impl ConnectionPool {
    /// Create a new pool for `connection_string` with the default configuration
    pub fn new<F: ConnectionFactory>(connection_string: impl Into<String>, factory: F) -> Self {
        Self::with_config(connection_string, factory, PoolConfig::default())
    }

    /// Create a new pool with the given configuration
    pub fn with_config<F: ConnectionFactory>(
        connection_string: impl Into<String>,
        factory: F,
        config: PoolConfig,
    ) -> Self {
        Self {
            connection_string: connection_string.into(),
            factory: Arc::new(factory),
            state: Mutex::new(Lifecycle::Configuring(config)),
        }
    }

    /// Adjust the configuration before the pool starts
    ///
    /// ```ignore
    /// pool.configure(|config| config.with_pool_size(2).with_validate_on_checkout(false))?;
    /// ```
    pub fn configure<F>(&self, configure: F) -> Result<()>
    where
        F: FnOnce(PoolConfig) -> PoolConfig,
    {
        let mut state = self.state.lock();
        match &mut *state {
            Lifecycle::Configuring(config) => {
                *config = configure(config.clone());
                Ok(())
            }
            _ => Err(PoolError::Configuration(
                "configuration is frozen once the pool has started".into(),
            )),
        }
    }

    /// Get a copy of the pool configuration
    pub fn config(&self) -> PoolConfig {
        self.state.lock().config().clone()
    }

    /// Start the pool
    ///
    /// Schedules one background creation per pool slot and returns without
    /// waiting for them. Starts the orphan watchdog if orphan detection is
    /// enabled. Must be called from within a Tokio runtime.
    #[tracing::instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(PoolError::Configuration(
                "the pool must be started from within a Tokio runtime".into(),
            ));
        }

        let mut state = self.state.lock();
        let config = match &*state {
            Lifecycle::Configuring(config) => config.clone(),
            Lifecycle::Running { .. } => {
                return Err(PoolError::Configuration("pool is already running".into()));
            }
            Lifecycle::Stopped(_) => {
                return Err(PoolError::Configuration(
                    "a stopped pool cannot be restarted".into(),
                ));
            }
        };
        config.validate()?;

        let inner = Arc::new(PoolInner::new(
            self.connection_string.clone(),
            Arc::clone(&self.factory),
            config,
        ));
        for _ in 0..inner.config.pool_size() {
            inner.replenish();
        }
        let watchdog = inner.leases.as_ref().map(|leases| {
            OrphanWatchdog::spawn(Arc::clone(leases), inner.config.orphan_check_interval())
        });

        tracing::info!(
            pool_size = inner.config.pool_size(),
            validate_on_checkout = inner.config.validate_on_checkout(),
            detect_orphans = inner.config.detect_orphans(),
            "connection pool started"
        );
        *state = Lifecycle::Running { inner, watchdog };
        Ok(())
    }

    /// Stop the pool
    ///
    /// Closes every idle connection. With orphan detection enabled, also
    /// stops the watchdog and closes every connection still checked out.
    /// Close failures are logged and never abort the shutdown.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) {
        let previous = {
            let mut state = self.state.lock();
            let config = state.config().clone();
            std::mem::replace(&mut *state, Lifecycle::Stopped(config))
        };

        match previous {
            Lifecycle::Running { inner, watchdog } => {
                inner.stopped.store(true, Ordering::SeqCst);
                if let Some(watchdog) = watchdog {
                    watchdog.stop().await;
                }
                let closed = inner.shutdown().await;
                tracing::info!(closed, "connection pool stopped");
            }
            Lifecycle::Configuring(_) => {
                tracing::debug!("stop called on a pool that was never started");
            }
            Lifecycle::Stopped(_) => {
                tracing::debug!("pool already stopped");
            }
        }
    }

    /// Check whether the pool has been started and not yet stopped
    pub fn is_running(&self) -> bool {
        matches!(&*self.state.lock(), Lifecycle::Running { .. })
    }

    /// Check out a connection, waiting up to the configured client timeout
    pub async fn get_connection(&self) -> Result<PooledConnection> {
        let inner = self.running()?;
        let timeout = inner.config.client_timeout();
        inner.acquire(timeout).await
    }

    /// Check out a connection, waiting up to `timeout`
    ///
    /// Fails with [`PoolError::NoAvailableConnections`] if no connection
    /// becomes available in time.
    pub async fn get_connection_with_timeout(&self, timeout: Duration) -> Result<PooledConnection> {
        self.running()?.acquire(timeout).await
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        match &*self.state.lock() {
            Lifecycle::Running { inner, .. } => inner.stats(),
            _ => PoolStats::default(),
        }
    }

    /// Snapshot of every checked-out connection past its orphan timeout
    ///
    /// Always empty when orphan detection is disabled.
    pub fn orphans(&self) -> Vec<OrphanReport> {
        match &*self.state.lock() {
            Lifecycle::Running { inner, .. } => inner
                .leases
                .as_ref()
                .map(|leases| leases.orphans(Instant::now()))
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Check whether the orphan watchdog is currently ticking
    pub fn is_watchdog_running(&self) -> bool {
        match &*self.state.lock() {
            Lifecycle::Running { watchdog, .. } => {
                watchdog.as_ref().is_some_and(OrphanWatchdog::is_running)
            }
            _ => false,
        }
    }

    fn running(&self) -> Result<Arc<PoolInner>> {
        match &*self.state.lock() {
            Lifecycle::Running { inner, .. } => Ok(Arc::clone(inner)),
            _ => Err(PoolError::NotRunning),
        }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> Option<Arc<PoolInner>> {
        self.running().ok()
    }
}

/// Counters shared by the acquire, release and replenish paths
#[derive(Default)]
struct PoolCounters {
    active: AtomicUsize,
    waiting: AtomicUsize,
    pending: AtomicUsize,
    created: AtomicU64,
    discarded: AtomicU64,
    creation_failures: AtomicU64,
}

/// Decrements the waiting counter when an acquire finishes or is dropped
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// State shared between the pool, its handles and its background tasks
pub(crate) struct PoolInner {
    connection_string: String,
    factory: Arc<dyn ConnectionFactory>,
    config: PoolConfig,
    idle: IdleQueue,
    /// Present only when orphan detection is enabled
    leases: Option<Arc<LeaseSet>>,
    counters: PoolCounters,
    stopped: AtomicBool,
}

impl PoolInner {
    fn new(
        connection_string: String,
        factory: Arc<dyn ConnectionFactory>,
        config: PoolConfig,
    ) -> Self {
        let leases = config.detect_orphans().then(|| Arc::new(LeaseSet::new()));
        Self {
            connection_string,
            factory,
            config,
            idle: IdleQueue::new(),
            leases,
            counters: PoolCounters::default(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Check out a connection, waiting at most `timeout` in total
    pub(crate) async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<PooledConnection> {
        let started = Instant::now();
        let _waiting = WaitingGuard::new(&self.counters.waiting);

        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            let Some(slot) = self.idle.pop(remaining).await else {
                break;
            };

            let slot = if self.config.validate_on_checkout() {
                match self.validate_checkout(slot, remaining).await {
                    Some(slot) => slot,
                    None => continue,
                }
            } else {
                slot
            };
            return Ok(self.lease(slot));
        }

        if self.stopped.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }
        tracing::debug!(
            timeout_ms = timeout.as_millis() as u64,
            "no connection became available before the timeout"
        );
        Err(PoolError::NoAvailableConnections { timeout })
    }

    /// Validate a dequeued slot; discard and replace it when invalid.
    ///
    /// The probe gets at most `budget`, the time the caller has left.
    async fn validate_checkout(
        self: &Arc<Self>,
        slot: IdleSlot,
        budget: Duration,
    ) -> Option<IdleSlot> {
        let connection = Arc::clone(&slot.connection);
        let checkout = Checkout::new(&self.idle, slot);
        let probe_timeout = budget.min(self.config.validation_timeout());
        let valid = validate::is_valid(connection.as_ref(), probe_timeout).await;
        let slot = checkout.into_slot()?;
        if valid {
            return Some(slot);
        }

        tracing::debug!(handle = %slot.id, "discarding connection that failed validation");
        self.counters.discarded.fetch_add(1, Ordering::SeqCst);
        slot.close_in_background("failed validation");
        self.replenish();
        None
    }

    /// Hand a slot to a caller, recording a lease if orphans are tracked
    fn lease(self: &Arc<Self>, slot: IdleSlot) -> PooledConnection {
        if let Some(leases) = &self.leases {
            let lease = Lease::new(
                slot.id,
                Arc::clone(&slot.connection),
                self.config.orphan_timeout(),
                Backtrace::force_capture(),
            );
            if !leases.insert(lease) {
                tracing::error!(handle = %slot.id, "connection leased while already leased");
            }
        }
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        PooledConnection::new(slot, Arc::clone(self))
    }

    /// Take a connection back from a caller. Never waits.
    ///
    /// A connection with no matching lease is not trusted back into the
    /// queue: it is closed and a replacement is opened.
    pub(crate) fn release(self: &Arc<Self>, slot: IdleSlot) -> Result<()> {
        if let Some(leases) = &self.leases
            && leases.remove(slot.id).is_none()
        {
            if self.stopped.load(Ordering::SeqCst) {
                // Shutdown already closed it along with the other leases
                tracing::debug!(handle = %slot.id, "connection returned after shutdown");
                return Ok(());
            }
            tracing::error!(handle = %slot.id, "released connection has no matching lease");
            let id = slot.id;
            self.counters.active.fetch_sub(1, Ordering::SeqCst);
            self.counters.discarded.fetch_add(1, Ordering::SeqCst);
            slot.close_in_background("released without a lease");
            self.replenish();
            return Err(PoolError::LeaseViolation(format!(
                "connection {id} was released without a matching lease"
            )));
        }
        self.counters.active.fetch_sub(1, Ordering::SeqCst);

        if let Err(slot) = self.idle.push(slot) {
            slot.close_in_background("returned after shutdown");
        }
        Ok(())
    }

    /// Open one connection in the background and add it to the idle queue.
    ///
    /// On retry exhaustion the pool simply stays one connection short.
    pub(crate) fn replenish(self: &Arc<Self>) {
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        let pool = Arc::clone(self);

        tokio::spawn(async move {
            let result = pool
                .config
                .retry_policy()
                .retry(|| pool.factory.create(&pool.connection_string))
                .await;

            match result {
                Ok(connection) => {
                    pool.counters.created.fetch_add(1, Ordering::SeqCst);
                    let slot = IdleSlot::new(connection);
                    let id = slot.id;
                    match pool.idle.push(slot) {
                        Ok(()) => tracing::debug!(handle = %id, "connection added to pool"),
                        Err(slot) => slot.close_in_background("opened after shutdown"),
                    }
                }
                Err(e) => {
                    pool.counters.creation_failures.fetch_add(1, Ordering::SeqCst);
                    tracing::error!(
                        error = %e,
                        "could not open a pooled connection; pool is running below capacity"
                    );
                }
            }
            pool.counters.pending.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Close every idle and leased connection. Returns how many were closed.
    async fn shutdown(&self) -> usize {
        self.stopped.store(true, Ordering::SeqCst);
        let mut closed = 0;

        for slot in self.idle.drain() {
            close_quietly(slot.connection.as_ref(), slot.id).await;
            closed += 1;
        }
        if let Some(leases) = &self.leases {
            for lease in leases.drain() {
                tracing::debug!(handle = %lease.id(), "closing connection still checked out");
                close_quietly(lease.connection().as_ref(), lease.id()).await;
                closed += 1;
            }
        }
        closed
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let idle = self.idle.len();
        let active = self.counters.active.load(Ordering::SeqCst);
        let waiting = self.counters.waiting.load(Ordering::SeqCst);
        PoolStats::new(idle + active, idle, active, waiting)
            .with_pending(self.counters.pending.load(Ordering::SeqCst))
            .with_lifetime_counters(
                self.counters.created.load(Ordering::SeqCst),
                self.counters.discarded.load(Ordering::SeqCst),
                self.counters.creation_failures.load(Ordering::SeqCst),
            )
            .with_orphans_reported(self.leases.as_ref().map_or(0, |l| l.reported()))
    }

    #[cfg(test)]
    pub(crate) fn is_idle(&self, id: HandleId) -> bool {
        self.idle.contains(id)
    }

    #[cfg(test)]
    pub(crate) fn is_leased(&self, id: HandleId) -> bool {
        self.leases.as_ref().is_some_and(|l| l.contains(id))
    }

    #[cfg(test)]
    pub(crate) fn forget_lease(&self, id: HandleId) -> bool {
        self.leases
            .as_ref()
            .is_some_and(|l| l.remove(id).is_some())
    }

    #[cfg(test)]
    pub(crate) fn lease_count(&self) -> usize {
        self.leases.as_ref().map_or(0, |l| l.len())
    }
}
