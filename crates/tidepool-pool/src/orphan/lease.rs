//! Lease bookkeeping for checked-out connections

use std::backtrace::Backtrace;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tidepool_core::Connection;
use tokio::time::Instant;

use crate::pool::HandleId;

/// A checked-out connection, tagged with its deadline and the call stack that
/// checked it out.
pub(crate) struct Lease {
    id: HandleId,
    connection: Arc<dyn Connection>,
    checked_out_at: Instant,
    timeout: Duration,
    backtrace: Arc<Backtrace>,
    reported: bool,
}

impl Lease {
    pub(crate) fn new(
        id: HandleId,
        connection: Arc<dyn Connection>,
        timeout: Duration,
        backtrace: Backtrace,
    ) -> Self {
        Self {
            id,
            connection,
            checked_out_at: Instant::now(),
            timeout,
            backtrace: Arc::new(backtrace),
            reported: false,
        }
    }

    pub(crate) fn id(&self) -> HandleId {
        self.id
    }

    pub(crate) fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.checked_out_at + self.timeout
    }

    /// Time left before the lease becomes an orphan; zero once overdue
    pub(crate) fn remaining(&self, now: Instant) -> Duration {
        self.deadline().saturating_duration_since(now)
    }

    fn report(&self, now: Instant) -> OrphanReport {
        OrphanReport {
            handle: self.id,
            held_for: now.saturating_duration_since(self.checked_out_at),
            timeout: self.timeout,
            backtrace: self.backtrace.to_string(),
        }
    }
}

/// An overdue checkout, as seen by the orphan watchdog
#[derive(Debug, Clone)]
pub struct OrphanReport {
    /// Handle that has not been returned
    pub handle: HandleId,
    /// How long the handle has been checked out
    pub held_for: Duration,
    /// The orphan timeout that was exceeded
    pub timeout: Duration,
    /// Call stack captured when the handle was checked out
    pub backtrace: String,
}

#[derive(Default)]
struct LeaseIndex {
    by_deadline: BTreeMap<(Instant, HandleId), Lease>,
    deadlines: HashMap<HandleId, Instant>,
}

/// The checked-out set: leases ordered by deadline, removable by handle.
///
/// A handle has at most one lease at a time.
#[derive(Default)]
pub(crate) struct LeaseSet {
    index: Mutex<LeaseIndex>,
    reported: AtomicU64,
}

impl LeaseSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a lease. Returns `false` if the handle is already leased.
    pub(crate) fn insert(&self, lease: Lease) -> bool {
        let mut index = self.index.lock();
        if index.deadlines.contains_key(&lease.id) {
            return false;
        }
        let deadline = lease.deadline();
        index.deadlines.insert(lease.id, deadline);
        index.by_deadline.insert((deadline, lease.id), lease);
        true
    }

    /// Remove the lease held by `id`, if any
    pub(crate) fn remove(&self, id: HandleId) -> Option<Lease> {
        let mut index = self.index.lock();
        let deadline = index.deadlines.remove(&id)?;
        index.by_deadline.remove(&(deadline, id))
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: HandleId) -> bool {
        self.index.lock().deadlines.contains_key(&id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.index.lock().deadlines.len()
    }

    /// The soonest-expiring lease and its remaining time, without removing it
    pub(crate) fn peek(&self, now: Instant) -> Option<(HandleId, Duration)> {
        let index = self.index.lock();
        index
            .by_deadline
            .values()
            .next()
            .map(|lease| (lease.id, lease.remaining(now)))
    }

    /// Overdue leases not reported before, soonest deadline first.
    ///
    /// Each lease is returned by at most one call.
    pub(crate) fn take_new_orphans(&self, now: Instant) -> Vec<OrphanReport> {
        let mut index = self.index.lock();
        let mut reports = Vec::new();
        for lease in index.by_deadline.values_mut() {
            if lease.deadline() > now {
                break;
            }
            if !lease.reported {
                lease.reported = true;
                reports.push(lease.report(now));
            }
        }
        self.reported.fetch_add(reports.len() as u64, Ordering::SeqCst);
        reports
    }

    /// Every overdue lease, reported or not, soonest deadline first
    pub(crate) fn orphans(&self, now: Instant) -> Vec<OrphanReport> {
        let index = self.index.lock();
        index
            .by_deadline
            .values()
            .take_while(|lease| lease.deadline() <= now)
            .map(|lease| lease.report(now))
            .collect()
    }

    /// Number of orphans reported since the set was created
    pub(crate) fn reported(&self) -> u64 {
        self.reported.load(Ordering::SeqCst)
    }

    /// Remove and return every lease
    pub(crate) fn drain(&self) -> Vec<Lease> {
        let mut index = self.index.lock();
        index.deadlines.clear();
        std::mem::take(&mut index.by_deadline).into_values().collect()
    }
}
