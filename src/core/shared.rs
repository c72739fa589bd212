//! State shared by the pool handle, the supervisor and every worker.
//!
//! Everything here is either immutable after construction (queue, bus, root
//! token), atomic (alive counter, restart counter), or a [`HookCell`] swapped
//! as a whole by the configuration calls on [`Pool`](crate::Pool).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use governor::{
    RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use tokio_util::sync::CancellationToken;

use super::alive::AliveCounter;
use super::cell::HookCell;
use super::panic::panic_message;
use super::report::ErrorReporter;
use crate::events::Bus;
use crate::queue::{QueueReader, QueueRef};
use crate::tasks::{HandleRef, Packet};

/// Token bucket applied before each handler invocation.
pub(crate) type Limiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Invoked once per packet after the handler returned, and once with a
/// worker-exit packet when a handler panicked.
pub type AfterHook<T, A = ()> = Arc<dyn Fn(&Packet<T, A>) + Send + Sync>;

pub(crate) struct Shared<T, A>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    pub(crate) queue: QueueRef<T>,
    pub(crate) reader: QueueReader<T>,
    pub(crate) handler: HookCell<HandleRef<T, A>>,
    pub(crate) limiter: HookCell<Limiter>,
    pub(crate) after: HookCell<AfterHook<T, A>>,
    pub(crate) reporter: ErrorReporter,
    pub(crate) alive: AliveCounter,
    pub(crate) token: CancellationToken,
    pub(crate) bus: Bus,
    pub(crate) restarts: AtomicU64,
}

impl<T, A> Shared<T, A>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    pub(crate) fn new(queue: QueueRef<T>, bus: Bus, reporter: ErrorReporter) -> Self {
        Self {
            reader: queue.reader(),
            queue,
            handler: HookCell::new(),
            limiter: HookCell::new(),
            after: HookCell::new(),
            reporter,
            alive: AliveCounter::new(),
            token: CancellationToken::new(),
            bus,
            restarts: AtomicU64::new(0),
        }
    }

    /// Runs the after hook, containing a panic inside it.
    pub(crate) fn run_after(&self, packet: &Packet<T, A>) {
        let Some(hook) = self.after.get() else {
            return;
        };
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| hook(packet))) {
            tracing::error!(
                worker = packet.worker_id(),
                info = %panic_message(&*panic),
                "after hook panicked"
            );
        }
    }
}
