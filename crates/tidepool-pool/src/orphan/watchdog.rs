//! Periodic orphan watchdog

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::lease::LeaseSet;

/// Background task that reports checkouts held past their deadline.
///
/// The watchdog only logs; it never closes or reclaims a connection.
pub(crate) struct OrphanWatchdog {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl OrphanWatchdog {
    /// Start ticking every `period`; the first sweep runs immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn spawn(leases: Arc<LeaseSet>, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        sweep(&leases);
                    }
                }
            }
            tracing::debug!("orphan watchdog stopped");
        });

        tracing::debug!(period_ms = period.as_millis() as u64, "orphan watchdog started");
        Self { cancel, task }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    /// Cancel the task and wait for it to finish
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::debug!(error = %e, "orphan watchdog ended abnormally");
        }
    }
}

/// Report every lease that became overdue since the previous sweep.
///
/// Returns how many orphans were reported.
pub(crate) fn sweep(leases: &LeaseSet) -> usize {
    let now = Instant::now();
    match leases.peek(now) {
        Some((_, remaining)) if remaining.is_zero() => {}
        _ => return 0,
    }

    let reports = leases.take_new_orphans(now);
    for report in &reports {
        tracing::warn!(
            handle = %report.handle,
            held_for_ms = report.held_for.as_millis() as u64,
            timeout_ms = report.timeout.as_millis() as u64,
            "Orphaned connection detected with stack:\n{}",
            report.backtrace
        );
    }
    reports.len()
}
