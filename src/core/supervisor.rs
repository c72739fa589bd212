//! # Supervisor: periodic health check of the worker slots.
//!
//! The supervisor task exclusively owns the slot vector (and with it the
//! per-slot aux state), so slots need no locking. It is the only place where a
//! worker is started.
//!
//! ## Loop
//! ```text
//! heal()  ── initial pass: every slot is Undefined → start
//! loop {
//!   select! (biased) {
//!     pool token cancelled ─► break
//!     ticker.tick()         ─► heal():
//!                                 Running             → untouched
//!                                 Undefined           → start
//!                                 Stopped / Panicked  → restart (restarts+1,
//!                                                       WorkerRestarted)
//!   }
//! }
//! close queue; cancel every slot   (idempotent)
//! ```
//!
//! Panic recovery latency is therefore bounded by one `supervisor_interval`.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::shared::Shared;
use super::worker::{Slot, Worker, WorkerState};
use crate::events::{Event, EventKind};

pub(crate) struct Supervisor<T, A>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    shared: Arc<Shared<T, A>>,
    slots: Vec<Slot<A>>,
    interval: Duration,
}

impl<T, A> Supervisor<T, A>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    pub(crate) fn new(shared: Arc<Shared<T, A>>, slots: Vec<Slot<A>>, interval: Duration) -> Self {
        Self {
            shared,
            slots,
            interval,
        }
    }

    /// Starts every slot, then runs the health-check loop in its own task.
    pub(crate) fn spawn(mut self) -> JoinHandle<()> {
        self.heal();
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shared.token.cancelled() => break,
                _ = ticker.tick() => self.heal(),
            }
        }

        self.shared.queue.close();
        for slot in &self.slots {
            slot.cancel();
        }
        tracing::debug!(workers = self.slots.len(), "supervisor stopped; queue closed");
    }

    /// Replaces every slot that is not running.
    fn heal(&mut self) {
        for slot in &mut self.slots {
            if self.shared.token.is_cancelled() {
                return;
            }
            let previous = slot.state();
            match previous {
                WorkerState::Running => continue,
                WorkerState::Undefined => {
                    Worker::start(slot, &self.shared);
                    tracing::debug!(worker = slot.id(), "worker start");
                }
                WorkerState::Stopped | WorkerState::Panicked => {
                    Worker::start(slot, &self.shared);
                    self.shared.restarts.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        worker = slot.id(),
                        previous = previous.as_str(),
                        "worker restart"
                    );
                    self.shared.bus.publish(
                        Event::new(EventKind::WorkerRestarted)
                            .with_worker(slot.id())
                            .with_reason(previous.as_str()),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorReporter;
    use crate::events::Bus;
    use crate::queue::ChannelQueue;

    type Fixture = (Arc<Shared<u8, usize>>, Supervisor<u8, usize>);

    fn supervisor(workers: usize, interval: Duration) -> Fixture {
        let shared = Arc::new(Shared::new(
            Arc::new(ChannelQueue::new(1)),
            Bus::new(64),
            ErrorReporter::new(),
        ));
        let slots = (0..workers).map(|id| Slot::new(id, Some(id * 10))).collect();
        (Arc::clone(&shared), Supervisor::new(shared, slots, interval))
    }

    #[tokio::test]
    async fn initial_pass_starts_every_slot() {
        let (shared, sup) = supervisor(3, Duration::from_secs(60));
        let handle = sup.spawn();
        assert_eq!(shared.alive.get(), 3);
        assert_eq!(shared.restarts.load(Ordering::Relaxed), 0);

        shared.token.cancel();
        handle.await.unwrap();
        assert!(shared.queue.is_closed());
    }

    #[tokio::test]
    async fn stopped_slot_is_restarted_with_same_aux() {
        let (shared, mut sup) = supervisor(2, Duration::from_secs(1));
        sup.heal();
        let mut events = shared.bus.subscribe();

        sup.slots[0].cancel();
        while sup.slots[0].state() == WorkerState::Running {
            tokio::task::yield_now().await;
        }
        assert_eq!(shared.alive.get(), 1);

        sup.heal();
        assert_eq!(shared.alive.get(), 2);
        assert_eq!(sup.slots[0].state(), WorkerState::Running);
        assert_eq!(shared.restarts.load(Ordering::Relaxed), 1);
        assert_eq!(sup.slots[0].aux(), Some(&0));

        loop {
            let ev = events.recv().await.unwrap();
            if ev.kind == EventKind::WorkerRestarted {
                assert_eq!(ev.worker, Some(0));
                assert_eq!(ev.reason.as_deref(), Some("stopped"));
                break;
            }
        }
        shared.token.cancel();
    }

    #[tokio::test]
    async fn no_restart_after_cancel() {
        let (shared, mut sup) = supervisor(1, Duration::from_secs(1));
        shared.token.cancel();
        sup.heal();
        assert_eq!(shared.alive.get(), 0);
        assert_eq!(sup.slots[0].state(), WorkerState::Undefined);
    }
}
