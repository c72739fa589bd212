//! # Worker: one competing consumer of the shared queue.
//!
//! A worker owns a child [`CancellationToken`] of the pool token and loops
//! between "cancelled" and "item available". Each item becomes a [`Packet`]
//! that is rate limited, handed to the registered handler and then to the
//! after hook.
//!
//! ## Lifecycle
//! ```text
//!            start()                    serve() returns
//! Undefined ───────► Running ─┬─────────────────────────► Stopped
//!                             │  (cancelled / queue closed)
//!                             │
//!                             └─────────────────────────► Panicked
//!                                handler panic caught:
//!                                report(trace) → cancel own token
//!                                → alive-1 → after hook(worker-exit packet)
//! ```
//!
//! ## Rules
//! - `start()` increments the alive counter before the task is spawned.
//! - The terminal state is stored **after** the alive decrement, so the
//!   supervisor can never respawn a slot whose previous worker is still counted.
//! - A panicking payload is not retried or re-enqueued.
//! - Handler errors are logged and reported; the payload counts as processed.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use super::panic::{panic_message, take_trace};
use super::shared::Shared;
use crate::error::{HandlerError, WorkerError};
use crate::events::{Event, EventKind};
use crate::tasks::{Packet, WorkerContext};

/// State of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Slot never started.
    Undefined = 0,
    /// Worker is in its run loop.
    Running = 1,
    /// Worker left its loop on cancellation or queue closure.
    Stopped = 2,
    /// Worker was torn down by a handler panic.
    Panicked = 3,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => WorkerState::Running,
            2 => WorkerState::Stopped,
            3 => WorkerState::Panicked,
            _ => WorkerState::Undefined,
        }
    }

    /// Short lowercase label for logs and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Undefined => "undefined",
            WorkerState::Running => "running",
            WorkerState::Stopped => "stopped",
            WorkerState::Panicked => "panicked",
        }
    }
}

/// Why a worker left its loop without panicking.
#[derive(Debug, Clone, Copy)]
enum Exit {
    Cancelled,
    QueueClosed,
}

impl Exit {
    fn as_str(&self) -> &'static str {
        match self {
            Exit::Cancelled => "cancelled",
            Exit::QueueClosed => "queue_closed",
        }
    }
}

/// Supervisor-owned record of one worker slot.
///
/// The aux state is created once per slot and handed to every worker that
/// occupies it.
pub(crate) struct Slot<A> {
    id: usize,
    state: Arc<AtomicU8>,
    token: Option<CancellationToken>,
    aux: Option<Arc<A>>,
}

impl<A> Slot<A> {
    pub(crate) fn new(id: usize, aux: Option<A>) -> Self {
        Self {
            id,
            state: Arc::new(AtomicU8::new(WorkerState::Undefined as u8)),
            token: None,
            aux: aux.map(Arc::new),
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn aux(&self) -> Option<&A> {
        self.aux.as_deref()
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Cancels the current worker, if any. Idempotent.
    pub(crate) fn cancel(&self) {
        if let Some(token) = &self.token {
            token.cancel();
        }
    }
}

pub(crate) struct Worker<T, A>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    id: usize,
    token: CancellationToken,
    state: Arc<AtomicU8>,
    aux: Option<Arc<A>>,
    shared: Arc<Shared<T, A>>,
}

impl<T, A> Worker<T, A>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    /// Puts a fresh worker into `slot` and spawns its loop.
    ///
    /// The previous occupant has already exited: slots are only refilled once
    /// their state left `Running`.
    pub(crate) fn start(slot: &mut Slot<A>, shared: &Arc<Shared<T, A>>) {
        let token = shared.token.child_token();
        let state = Arc::new(AtomicU8::new(WorkerState::Running as u8));
        shared.alive.inc();

        slot.state = Arc::clone(&state);
        slot.token = Some(token.clone());

        let worker = Worker {
            id: slot.id,
            token,
            state,
            aux: slot.aux.clone(),
            shared: Arc::clone(shared),
        };
        tokio::spawn(worker.run());
    }

    async fn run(self) {
        tracing::debug!(worker = self.id, "worker started");
        self.shared
            .bus
            .publish(Event::new(EventKind::WorkerStarting).with_worker(self.id));

        match AssertUnwindSafe(self.serve()).catch_unwind().await {
            Ok(exit) => self.stopped(exit),
            Err(panic) => self.panicked(&*panic),
        }
    }

    async fn serve(&self) -> Exit {
        loop {
            let item = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Exit::Cancelled,
                item = self.shared.reader.recv() => match item {
                    Some(item) => item,
                    None => return Exit::QueueClosed,
                },
            };

            let mut packet = Packet::new(item, self.context());
            if !self.rate_limit().await {
                tracing::debug!(worker = self.id, "stopped while rate limited; payload dropped");
                return Exit::Cancelled;
            }
            self.dispatch(&mut packet).await;
            self.shared.run_after(&packet);
        }
    }

    /// Waits for a limiter token. `false` if the pool was stopped meanwhile.
    async fn rate_limit(&self) -> bool {
        let Some(limiter) = self.shared.limiter.get() else {
            return true;
        };
        tokio::select! {
            biased;
            _ = self.shared.token.cancelled() => false,
            _ = limiter.until_ready() => true,
        }
    }

    async fn dispatch(&self, packet: &mut Packet<T, A>) {
        let Some(handler) = self.shared.handler.get() else {
            tracing::warn!(worker = self.id, "no handler registered; payload dropped");
            self.shared
                .reporter
                .report(WorkerError::NoHandler { worker: self.id });
            return;
        };

        match handler.handle(packet).await {
            Ok(()) => {}
            Err(HandlerError::Canceled) => {
                tracing::debug!(worker = self.id, "handler observed cancellation");
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(worker = self.id, label = e.as_label(), %error, "handler failed");
                self.shared.bus.publish(
                    Event::new(EventKind::TaskFailed)
                        .with_worker(self.id)
                        .with_reason(error.as_str()),
                );
                self.shared.reporter.report(WorkerError::Handler {
                    worker: self.id,
                    error,
                });
            }
        }
    }

    fn stopped(&self, exit: Exit) {
        self.token.cancel();
        self.shared.alive.dec();
        self.set_state(WorkerState::Stopped);

        tracing::debug!(worker = self.id, reason = exit.as_str(), "worker exited");
        self.shared.bus.publish(
            Event::new(EventKind::WorkerStopped)
                .with_worker(self.id)
                .with_reason(exit.as_str()),
        );
    }

    fn panicked(&self, payload: &(dyn Any + Send)) {
        let message = panic_message(payload);
        let trace = take_trace();
        tracing::error!(worker = self.id, %message, "handler panicked; worker torn down");

        self.shared.reporter.report(WorkerError::Panicked {
            worker: self.id,
            message: message.clone(),
            trace,
        });
        self.token.cancel();
        self.shared.alive.dec();
        self.set_state(WorkerState::Panicked);

        self.shared.bus.publish(
            Event::new(EventKind::WorkerPanicked)
                .with_worker(self.id)
                .with_reason(message),
        );
        self.shared.run_after(&Packet::worker_exit(self.context()));
    }

    fn context(&self) -> WorkerContext<A> {
        WorkerContext::new(
            self.id,
            self.aux.clone(),
            self.token.clone(),
            self.shared.reporter.clone(),
        )
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorReporter;
    use crate::events::Bus;
    use crate::queue::ChannelQueue;
    use crate::tasks::{HandleFn, HandleRef};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    fn shared(capacity: usize) -> Arc<Shared<u64, ()>> {
        Arc::new(Shared::new(
            Arc::new(ChannelQueue::new(capacity)),
            Bus::new(64),
            ErrorReporter::new(),
        ))
    }

    async fn until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[test]
    fn state_roundtrips_through_u8() {
        for s in [
            WorkerState::Undefined,
            WorkerState::Running,
            WorkerState::Stopped,
            WorkerState::Panicked,
        ] {
            assert_eq!(WorkerState::from_u8(s as u8), s);
        }
        assert_eq!(WorkerState::from_u8(200), WorkerState::Undefined);
    }

    #[tokio::test]
    async fn own_cancel_stops_only_this_worker() {
        let shared = shared(4);
        let mut a = Slot::new(0, None);
        let mut b = Slot::new(1, None);
        Worker::start(&mut a, &shared);
        Worker::start(&mut b, &shared);
        assert_eq!(shared.alive.get(), 2);

        a.cancel();
        until(|| a.state() == WorkerState::Stopped).await;
        assert_eq!(b.state(), WorkerState::Running);
        assert_eq!(shared.alive.get(), 1);
        assert!(!shared.token.is_cancelled());
    }

    #[tokio::test]
    async fn queue_closure_marks_stopped() {
        let shared = shared(1);
        let mut slot = Slot::new(0, None);
        Worker::start(&mut slot, &shared);

        shared.queue.close();
        until(|| slot.state() == WorkerState::Stopped).await;
        assert_eq!(shared.alive.get(), 0);
    }

    #[tokio::test]
    async fn panic_is_contained_and_reported() {
        crate::core::panic::install_trace_hook();
        let shared = shared(4);
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        shared.reporter.set(Some(Arc::new(move |e: WorkerError| {
            sink.lock().unwrap().push(e)
        })));

        let seen = Arc::new(AtomicU64::new(0));
        let s = Arc::clone(&seen);
        let handler: HandleRef<u64> = HandleFn::arc(move |n: u64, _ctx: WorkerContext| {
            let s = Arc::clone(&s);
            async move {
                if n == 13 {
                    panic!("unlucky");
                }
                s.fetch_add(1, Ordering::SeqCst);
            }
        });
        shared.handler.set(Some(handler));

        let exits = Arc::new(AtomicU64::new(0));
        let e = Arc::clone(&exits);
        shared.after.set(Some(Arc::new(move |p: &Packet<u64>| {
            if p.is_worker_exit() {
                e.fetch_add(1, Ordering::SeqCst);
            }
        })));

        let mut slot = Slot::new(0, None);
        Worker::start(&mut slot, &shared);
        shared.queue.push(1).await.unwrap();
        shared.queue.push(13).await.unwrap();

        until(|| slot.state() == WorkerState::Panicked).await;
        assert_eq!(shared.alive.get(), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(exits.load(Ordering::SeqCst), 1);

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        match &reports[0] {
            WorkerError::Panicked { message, trace, .. } => {
                assert_eq!(message, "unlucky");
                assert!(!trace.is_empty());
            }
            other => panic!("unexpected report: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_handler_is_reported() {
        let shared = shared(1);
        let reports = Arc::new(AtomicU64::new(0));
        let r = Arc::clone(&reports);
        shared.reporter.set(Some(Arc::new(move |e: WorkerError| {
            assert!(matches!(e, WorkerError::NoHandler { worker: 0 }));
            r.fetch_add(1, Ordering::SeqCst);
        })));

        let mut slot = Slot::new(0, None);
        Worker::start(&mut slot, &shared);
        shared.queue.push(5).await.unwrap();

        until(|| reports.load(Ordering::SeqCst) == 1).await;
        assert_eq!(slot.state(), WorkerState::Running);
    }
}
