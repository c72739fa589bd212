//! # Running-worker counter.
//!
//! [`AliveCounter`] is the only state shared by every worker: incremented when
//! a worker is constructed, decremented once when its run loop exits (clean
//! exit, cancellation, queue closure or panic).
//!
//! ## Rules
//! - A worker decrements **before** it publishes its terminal state, and the
//!   supervisor only respawns slots whose terminal state it has observed, so
//!   `get() <= worker_count` holds at every instant.
//! - Reads are eventually consistent.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Atomic count of workers currently in the `Running` state.
#[derive(Debug, Default)]
pub struct AliveCounter {
    count: AtomicUsize,
    zero: Notify,
}

impl AliveCounter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of running workers.
    #[inline]
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn inc(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements without underflowing; wakes [`wait_zero`](Self::wait_zero) at zero.
    pub(crate) fn dec(&self) {
        let prev = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev == Ok(1) {
            self.zero.notify_waiters();
        }
    }

    /// Resolves once no worker is running.
    pub async fn wait_zero(&self) {
        loop {
            let notified = self.zero.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}
