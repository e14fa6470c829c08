//! Idle connection queue

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tidepool_core::Connection;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::handle::HandleId;

/// A physical connection together with the identity the pool gave it
pub(crate) struct IdleSlot {
    pub(crate) id: HandleId,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) created_at: Instant,
}

impl IdleSlot {
    /// Wrap a freshly opened connection under a new identity
    pub(crate) fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            id: HandleId::next(),
            connection,
            created_at: Instant::now(),
        }
    }

    /// Close the connection on a background task, if a runtime is still around
    pub(crate) fn close_in_background(self, reason: &'static str) {
        let IdleSlot { id, connection, .. } = self;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tracing::debug!(handle = %id, reason, "closing connection");
                    close_quietly(connection.as_ref(), id).await;
                });
            }
            Err(_) => {
                tracing::debug!(handle = %id, reason, "no runtime to close connection, dropping it");
            }
        }
    }
}

/// Close a connection, logging instead of returning any failure
pub(crate) async fn close_quietly(connection: &dyn Connection, id: HandleId) {
    if let Err(e) = connection.close().await {
        tracing::debug!(handle = %id, error = %e, "Error closing connection");
    }
}

/// Multi-producer, multi-consumer FIFO of idle connections.
///
/// Every queued slot is backed by exactly one semaphore permit, so a popper
/// holding a permit always finds a slot in the deque.
pub(crate) struct IdleQueue {
    slots: Mutex<VecDeque<IdleSlot>>,
    available: Semaphore,
}

impl IdleQueue {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(VecDeque::new()),
            available: Semaphore::new(0),
        }
    }

    /// Append a slot and wake one waiting popper.
    ///
    /// Hands the slot back if the queue has been drained.
    pub(crate) fn push(&self, slot: IdleSlot) -> Result<(), IdleSlot> {
        let mut slots = self.slots.lock();
        if self.available.is_closed() {
            return Err(slot);
        }
        slots.push_back(slot);
        self.available.add_permits(1);
        Ok(())
    }

    /// Take the oldest slot, waiting up to `wait` for one to arrive.
    ///
    /// Returns `None` on timeout, when `wait` is zero, or once the queue has
    /// been drained for shutdown. Dropping the future before it resolves
    /// takes nothing from the queue.
    pub(crate) async fn pop(&self, wait: Duration) -> Option<IdleSlot> {
        if wait.is_zero() {
            return None;
        }
        let permit = match tokio::time::timeout(wait, self.available.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => return None,
        };
        permit.forget();
        self.slots.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: HandleId) -> bool {
        self.slots.lock().iter().any(|slot| slot.id == id)
    }

    /// Remove every slot and refuse all current and future poppers
    pub(crate) fn drain(&self) -> Vec<IdleSlot> {
        let mut slots = self.slots.lock();
        self.available.close();
        slots.drain(..).collect()
    }
}

/// A slot taken off the queue but not yet handed to a caller.
///
/// If the checkout is abandoned (the acquiring future is dropped while the
/// slot is being validated) the slot goes back to the queue.
pub(crate) struct Checkout<'a> {
    queue: &'a IdleQueue,
    slot: Option<IdleSlot>,
}

impl<'a> Checkout<'a> {
    pub(crate) fn new(queue: &'a IdleQueue, slot: IdleSlot) -> Self {
        Self {
            queue,
            slot: Some(slot),
        }
    }

    /// Keep the slot; the queue no longer gets it back on drop
    pub(crate) fn into_slot(mut self) -> Option<IdleSlot> {
        self.slot.take()
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            tracing::debug!(handle = %slot.id, "checkout abandoned, returning connection to idle queue");
            if let Err(slot) = self.queue.push(slot) {
                slot.close_in_background("checkout abandoned after shutdown");
            }
        }
    }
}
