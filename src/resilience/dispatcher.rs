//! Bounded concurrency dispatcher for outbound backend calls.
//!
//! # Responsibilities
//! - Cap the number of backend calls executing at once
//! - Queue excess callers and release them in FIFO order
//! - Release the slot on every exit path (success, error, panic, drop)
//!
//! # Design Decisions
//! - Built on tokio's `Semaphore`, which is fair: a waiter queued first is
//!   admitted first, and a brand-new caller never overtakes a queued one
//! - The slot is an RAII permit, so a cancelled or panicking operation
//!   still frees it
//! - Generic over the operation's output; errors pass through untouched

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::observability::metrics;

/// Admits at most `max_concurrent` operations at a time.
#[derive(Debug)]
pub struct Dispatcher {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    queued: AtomicUsize,
}

impl Dispatcher {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            queued: AtomicUsize::new(0),
        }
    }

    /// Run `operation` once a slot is free and return its output.
    ///
    /// The slot is held only while the operation's future is being driven.
    pub async fn submit<F, Fut>(&self, operation: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let slot = {
            let _waiting = QueueGuard::enter(self);
            self.slots
                .acquire()
                .await
                .expect("dispatcher semaphore is never closed")
        };

        metrics::record_dispatcher_state(self.in_flight(), self.queued());
        let output = operation().await;
        drop(slot);
        metrics::record_dispatcher_state(self.in_flight(), self.queued());

        output
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Operations currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    /// Callers waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }
}

/// Tracks a caller in the wait queue until it is admitted or dropped.
struct QueueGuard<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> QueueGuard<'a> {
    fn enter(dispatcher: &'a Dispatcher) -> Self {
        let waiting = dispatcher.queued.fetch_add(1, Ordering::Relaxed) + 1;
        if dispatcher.slots.available_permits() == 0 {
            tracing::debug!(
                queued = waiting,
                max_concurrent = dispatcher.max_concurrent,
                "Backend call queued for a dispatcher slot"
            );
        }
        Self { dispatcher }
    }
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.queued.fetch_sub(1, Ordering::Relaxed);
    }
}
