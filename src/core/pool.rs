//! # Pool: the public face of the worker pool.
//!
//! A [`Pool`] owns the shared queue, the supervisor task and the root
//! cancellation token. It exposes task submission, handler registration and the
//! runtime knobs (error sink, rate limit, after hook).
//!
//! ## Architecture
//! ```text
//!  push(T) ──► DurableQueue ──► QueueReader ──┬──► Worker 0 ─┐
//!                                             ├──► Worker 1 ─┼─► handler(&mut Packet)
//!                                             └──► Worker N ─┘        │
//!                                                                      ├─► error sink
//!                                                                      └─► after hook
//!  Supervisor ── every supervisor_interval ──► restart non-running slots
//!
//!  stop() ─► root token cancelled ─► every worker token (children)
//!                                  └► supervisor: close queue, cancel slots
//! ```
//!
//! ## Rules
//! - After `stop()`, `push` is a silent no-op and `alive()` only decreases.
//! - `stop()` is idempotent and never blocks; use [`Pool::wait_idle`] or
//!   [`Pool::shutdown`] for drain semantics.
//! - Queue write failures are logged and published as `PushFailed`; they are
//!   never returned to the submitter.
//! - Dropping the pool stops it.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::time::Duration;
//! use queuevisor::{PoolBuilder, PoolConfig, WorkerContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = PoolConfig { worker_count: 4, ..PoolConfig::default() };
//!     let pool = PoolBuilder::<u64>::new(cfg).build()?;
//!
//!     let sum = Arc::new(AtomicU64::new(0));
//!     let s = Arc::clone(&sum);
//!     pool.handler(move |n: u64, _ctx: WorkerContext| {
//!         let s = Arc::clone(&s);
//!         async move { s.fetch_add(n, Ordering::SeqCst); }
//!     });
//!
//!     for n in 1..=10 {
//!         pool.push(n).await;
//!     }
//!     pool.shutdown(Duration::from_secs(5)).await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use governor::{Quota, RateLimiter};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::report::ErrorSink;
use super::shared::{AfterHook, Shared};
use super::shutdown::termination_signal;
use crate::error::{HandlerError, PoolError, QueueError, RuntimeError, WorkerError};
use crate::events::{Event, EventKind};
use crate::queue::QueueRef;
use crate::tasks::{HandleFn, HandleRef, Packet, TryHandleFn, WorkerContext};

/// Self-healing pool of workers consuming one shared queue.
///
/// `T` is the payload type, `A` the per-slot auxiliary state produced by the
/// aux factory (`()` when unused). Build one with
/// [`PoolBuilder`](crate::PoolBuilder).
pub struct Pool<T, A = ()>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    shared: Arc<Shared<T, A>>,
    worker_count: usize,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    listener: Option<CancellationToken>,
}

impl<T, A> Pool<T, A>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    pub(crate) fn new(
        shared: Arc<Shared<T, A>>,
        worker_count: usize,
        supervisor: JoinHandle<()>,
        listener: Option<CancellationToken>,
    ) -> Self {
        Self {
            shared,
            worker_count,
            supervisor: Mutex::new(Some(supervisor)),
            listener,
        }
    }

    /// Enqueues one payload.
    ///
    /// A no-op once the pool is stopped. On a rendezvous queue this waits for a
    /// worker to take the item, on a bounded queue for free room; a stop while
    /// waiting drops the payload. Backend failures are logged and published as
    /// [`EventKind::PushFailed`], never returned.
    pub async fn push(&self, payload: T) {
        if self.shared.token.is_cancelled() {
            tracing::debug!("push on stopped pool ignored");
            return;
        }

        let res = tokio::select! {
            biased;
            _ = self.shared.token.cancelled() => Err(QueueError::Closed),
            res = self.shared.queue.push(payload) => res,
        };

        match res {
            Ok(()) => {}
            Err(QueueError::Closed) if self.shared.token.is_cancelled() => {
                tracing::debug!("pool stopped during push; payload dropped");
            }
            Err(e) => {
                tracing::warn!(label = e.as_label(), error = %e, "push failed");
                self.shared
                    .bus
                    .publish(Event::new(EventKind::PushFailed).with_reason(e.to_string()));
            }
        }
    }

    /// Registers an infallible closure handler, replacing any previous one.
    pub fn handler<F, Fut>(&self, f: F)
    where
        F: Fn(T, WorkerContext<A>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: HandleRef<T, A> = HandleFn::arc(f);
        self.shared.handler.set(Some(handler));
    }

    /// Registers a fallible closure handler, replacing any previous one.
    ///
    /// Errors returned by the closure are logged and sent to the error sink.
    /// Fails with [`PoolError::Stopped`] on a stopped pool.
    pub fn handler_with_error<F, Fut>(&self, f: F) -> Result<(), PoolError>
    where
        F: Fn(T, WorkerContext<A>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        if self.is_stopped() {
            return Err(PoolError::Stopped);
        }
        let handler: HandleRef<T, A> = TryHandleFn::arc(f);
        self.shared.handler.set(Some(handler));
        Ok(())
    }

    /// Registers a handler object, replacing any previous one.
    pub fn handler_object(&self, handler: HandleRef<T, A>) {
        self.shared.handler.set(Some(handler));
    }

    /// Installs the sink receiving every worker error, panic and report.
    pub fn set_error_sink<F>(&self, sink: F)
    where
        F: Fn(WorkerError) + Send + Sync + 'static,
    {
        let sink: ErrorSink = Arc::new(sink);
        self.shared.reporter.set(Some(sink));
    }

    /// Limits handler invocations to `per_second` across all workers, with a
    /// burst of the same size. `0` removes the limit.
    ///
    /// Applies to dequeued tasks, not to `push`.
    pub fn set_rate_limit(&self, per_second: u32) {
        let limiter = NonZeroU32::new(per_second)
            .map(|n| Arc::new(RateLimiter::direct(Quota::per_second(n).allow_burst(n))));
        tracing::debug!(per_second, "rate limit updated");
        self.shared.limiter.set(limiter);
    }

    /// Installs the hook run after every handler call and on worker death.
    ///
    /// Closure handlers registered with [`handler`](Self::handler) or
    /// [`handler_with_error`](Self::handler_with_error) take the payload out of
    /// the packet, so for them the hook sees `payload() == None`; worker id,
    /// aux value and [`is_worker_exit`](Packet::is_worker_exit) are still set.
    /// Handler objects that only borrow the payload leave it in place.
    pub fn set_after_hook<F>(&self, hook: F)
    where
        F: Fn(&Packet<T, A>) + Send + Sync + 'static,
    {
        let hook: AfterHook<T, A> = Arc::new(hook);
        self.shared.after.set(Some(hook));
    }

    /// Number of workers currently running. Eventually consistent, never above
    /// [`worker_count`](Self::worker_count).
    pub fn alive(&self) -> usize {
        self.shared.alive.get()
    }

    /// Configured number of worker slots.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Total number of workers respawned by the supervisor.
    pub fn restarts(&self) -> u64 {
        self.shared.restarts.load(Ordering::Relaxed)
    }

    /// True once [`stop`](Self::stop) was called.
    pub fn is_stopped(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Shared handle to the queue backend.
    pub fn queue(&self) -> QueueRef<T> {
        Arc::clone(&self.shared.queue)
    }

    /// True if a handler is registered.
    pub fn has_handler(&self) -> bool {
        self.shared.handler.is_set()
    }

    /// Receiver of subsequent pool events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.bus.subscribe()
    }

    /// Cancels the pool. Idempotent and non-blocking.
    ///
    /// Every worker token is a child of the pool token; the supervisor then
    /// closes the queue.
    pub fn stop(&self) {
        if self.shared.token.is_cancelled() {
            return;
        }
        tracing::info!(alive = self.alive(), "pool stop requested");
        self.shared.token.cancel();
    }

    /// Resolves once no worker is running.
    pub async fn wait_idle(&self) {
        self.shared.alive.wait_zero().await;
    }

    /// Stops the pool and waits up to `grace` for every worker to exit and the
    /// queue backend to release its resources.
    ///
    /// Publishes [`EventKind::AllStoppedWithin`] on success or
    /// [`EventKind::GraceExceeded`] on timeout.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), RuntimeError> {
        self.stop();
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let drained = tokio::time::timeout(grace, async {
            if let Some(handle) = supervisor {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "supervisor task failed");
                }
            }
            self.shared.alive.wait_zero().await;
            self.shared.queue.close();
            self.shared.queue.wait_closed().await;
        })
        .await;

        match drained {
            Ok(()) => {
                tracing::info!("all workers stopped within grace");
                self.shared.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let alive = self.alive();
                tracing::warn!(?grace, alive, "grace exceeded");
                self.shared.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(format!("alive={alive}")),
                );
                Err(RuntimeError::GraceExceeded { grace, alive })
            }
        }
    }

    /// Runs until a termination signal arrives (or the pool is stopped), then
    /// performs [`shutdown`](Self::shutdown) with `grace`.
    pub async fn run_until_signal(&self, grace: Duration) -> Result<(), RuntimeError> {
        tokio::select! {
            signal = termination_signal() => {
                tracing::info!(signal, "shutdown signal received");
                self.shared.bus.publish(
                    Event::new(EventKind::ShutdownRequested).with_reason(signal),
                );
            }
            _ = self.shared.token.cancelled() => {}
        }
        self.shutdown(grace).await
    }
}

impl<T, A> Drop for Pool<T, A>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shared.token.cancel();
        if let Some(listener) = &self.listener {
            listener.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PoolBuilder, PoolConfig};
    use std::sync::atomic::AtomicUsize;

    fn config(workers: usize) -> PoolConfig {
        PoolConfig {
            worker_count: workers,
            queue_capacity: 8,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_push_becomes_noop() {
        let pool = PoolBuilder::<u32>::new(config(2)).build().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        pool.handler(move |_n: u32, _ctx: WorkerContext| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        pool.stop();
        pool.stop();
        assert!(pool.is_stopped());

        pool.push(1).await;
        pool.wait_idle().await;
        assert_eq!(pool.alive(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_with_error_refused_after_stop() {
        let pool = PoolBuilder::<u32>::new(config(1)).build().unwrap();
        pool.handler_with_error(|_n: u32, _ctx: WorkerContext| async { Ok(()) })
            .unwrap();
        assert!(pool.has_handler());

        pool.stop();
        let err = pool
            .handler_with_error(|_n: u32, _ctx: WorkerContext| async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, PoolError::Stopped));
    }

    #[tokio::test]
    async fn shutdown_reports_grace_exceeded_for_stuck_handler() {
        let pool = PoolBuilder::<u32>::new(config(1)).build().unwrap();
        pool.handler(|_n: u32, _ctx: WorkerContext| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        pool.push(1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = pool.shutdown(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, RuntimeError::GraceExceeded { alive: 1, .. }));
    }

    #[tokio::test]
    async fn after_hook_sees_worker_id_but_no_payload_for_closures() {
        let pool = PoolBuilder::<u32>::new(config(1)).build().unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        pool.set_after_hook(move |p: &Packet<u32>| {
            if !p.is_worker_exit() {
                s.lock().unwrap().push((p.worker_id(), p.payload().copied()));
            }
        });
        pool.handler(|_n: u32, _ctx: WorkerContext| async {});

        pool.push(5).await;
        for _ in 0..400 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![(0, None)]);
    }

    #[tokio::test]
    async fn shutdown_within_grace_publishes_event() {
        let pool = PoolBuilder::<u32>::new(config(3)).build().unwrap();
        let mut events = pool.subscribe();

        pool.shutdown(Duration::from_secs(2)).await.unwrap();
        assert_eq!(pool.alive(), 0);

        loop {
            if events.recv().await.unwrap().kind == EventKind::AllStoppedWithin {
                break;
            }
        }
    }
}
