use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::panic::install_trace_hook;
use super::pool::Pool;
use super::report::{ErrorReporter, ErrorSink};
use super::shared::Shared;
use super::supervisor::Supervisor;
use super::worker::Slot;
use crate::{
    core::PoolConfig,
    error::{PoolError, WorkerError},
    events::Bus,
    queue::{ChannelQueue, DiskLogFn, DiskQueue, QueueRef},
    subscribers::{Subscribe, SubscriberSet},
};

type AuxFactory<A> = Box<dyn FnMut(usize) -> A + Send>;

/// Builder for constructing a [`Pool`] with optional collaborators.
///
/// - [`build`](Self::build) uses the in-memory channel backend, or a queue set
///   with [`with_queue`](Self::with_queue).
/// - [`build_durable`](Self::build_durable) additionally honors
///   [`PoolConfig::disk`]; it requires a serde-encodable payload.
pub struct PoolBuilder<T, A = ()>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    cfg: PoolConfig,
    aux_factory: Option<AuxFactory<A>>,
    disk_log: Option<DiskLogFn>,
    queue: Option<QueueRef<T>>,
    sink: Option<ErrorSink>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl<T, A> PoolBuilder<T, A>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: PoolConfig) -> Self {
        Self {
            cfg,
            aux_factory: None,
            disk_log: None,
            queue: None,
            sink: None,
            subscribers: Vec::new(),
        }
    }

    /// Sets the per-slot auxiliary state constructor.
    ///
    /// Called once per slot with the slot id at build time; the value survives
    /// worker restarts in that slot.
    pub fn with_aux_factory<F>(mut self, factory: F) -> Self
    where
        F: FnMut(usize) -> A + Send + 'static,
    {
        self.aux_factory = Some(Box::new(factory));
        self
    }

    /// Sets the diagnostics sink of the disk backend.
    pub fn with_disk_log<F>(mut self, log: F) -> Self
    where
        F: Fn(crate::queue::LogLevel, &str) + Send + Sync + 'static,
    {
        let log: DiskLogFn = Arc::new(log);
        self.disk_log = Some(log);
        self
    }

    /// Uses a caller-provided queue backend instead of the configured one.
    pub fn with_queue(mut self, queue: QueueRef<T>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Installs the error sink before any worker starts.
    pub fn with_error_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(WorkerError) + Send + Sync + 'static,
    {
        let sink: ErrorSink = Arc::new(sink);
        self.sink = Some(sink);
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive pool events through dedicated workers with bounded
    /// queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the pool and starts its workers.
    ///
    /// Must be called from within a tokio runtime. Fails on an invalid config,
    /// or when disk settings are present without an explicit queue (use
    /// [`build_durable`](Self::build_durable) for those).
    pub fn build(mut self) -> Result<Pool<T, A>, PoolError> {
        self.cfg.validate()?;
        let queue = match self.queue.take() {
            Some(queue) => queue,
            None if self.cfg.is_disk_backed() => {
                return Err(PoolError::invalid(
                    "disk settings require build_durable() or with_queue()",
                ));
            }
            None => Arc::new(ChannelQueue::new(self.cfg.queue_capacity)),
        };
        Ok(self.assemble(queue))
    }

    fn assemble(mut self, queue: QueueRef<T>) -> Pool<T, A> {
        install_trace_hook();

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let listener = (!self.subscribers.is_empty())
            .then(|| subscriber_listener(&bus, std::mem::take(&mut self.subscribers)));

        let reporter = ErrorReporter::new();
        reporter.set(self.sink.take());
        let shared = Arc::new(Shared::new(queue, bus, reporter));

        let slots = (0..self.cfg.worker_count)
            .map(|id| Slot::new(id, self.aux_factory.as_mut().map(|make| make(id))))
            .collect();

        tracing::info!(
            workers = self.cfg.worker_count,
            interval = ?self.cfg.supervisor_interval,
            disk = self.cfg.is_disk_backed(),
            "pool starting"
        );
        let supervisor =
            Supervisor::new(Arc::clone(&shared), slots, self.cfg.supervisor_interval).spawn();
        Pool::new(shared, self.cfg.worker_count, supervisor, listener)
    }
}

impl<T, A> PoolBuilder<T, A>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    A: Send + Sync + 'static,
{
    /// Builds the pool, opening the disk backend when [`PoolConfig::disk`] is
    /// set.
    ///
    /// Fails with [`PoolError::QueueOpen`] when the directory cannot be
    /// created, the metadata is corrupt or the active segment is unwritable.
    pub async fn build_durable(mut self) -> Result<Pool<T, A>, PoolError> {
        self.cfg.validate()?;
        let queue: QueueRef<T> = match (self.queue.take(), self.cfg.disk.clone()) {
            (Some(queue), _) => queue,
            (None, Some(disk)) => {
                let queue = DiskQueue::open(disk, self.disk_log.clone())
                    .await
                    .map_err(|source| PoolError::QueueOpen { source })?;
                Arc::new(queue)
            }
            (None, None) => Arc::new(ChannelQueue::new(self.cfg.queue_capacity)),
        };
        Ok(self.assemble(queue))
    }
}

/// Subscribes to the bus and forwards events to the subscriber set
/// (fire-and-forget).
///
/// Returns the token that ends the listener; queued events are still
/// delivered before the set is drained.
fn subscriber_listener(bus: &Bus, subscribers: Vec<Arc<dyn Subscribe>>) -> CancellationToken {
    let mut rx = bus.subscribe();
    let set = SubscriberSet::new(subscribers, bus.clone());
    let stop = CancellationToken::new();
    let stopped = stop.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                res = rx.recv() => match res {
                    Ok(ev) => set.emit(&ev),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscriber listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = stopped.cancelled() => break,
            }
        }
        set.shutdown().await;
    });
    stop
}
