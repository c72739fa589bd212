//! # Per-task envelope handed to handlers.
//!
//! A [`Packet`] owns one dequeued payload and a [`WorkerContext`]: the narrow
//! view of the worker that dequeued it. Through the context a handler can read
//! the slot's auxiliary state, cancel **its own** worker, and report errors to
//! the pool's error sink.
//!
//! ```text
//! Worker ──dequeue──► Packet { payload, ctx } ──► Handle::handle(&mut packet)
//!                                   │                         │
//!                                   │                         ▼
//!                                   └──────────────► after hook (&packet)
//! ```
//!
//! Packets live only for one handler call and the after hook that follows it.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::ErrorReporter;
use crate::error::WorkerError;

/// Worker-scoped capabilities exposed to handler code.
///
/// Cheap to clone; a clone stays bound to the same worker.
pub struct WorkerContext<A = ()> {
    id: usize,
    aux: Option<Arc<A>>,
    token: CancellationToken,
    reporter: ErrorReporter,
}

impl<A> Clone for WorkerContext<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            aux: self.aux.clone(),
            token: self.token.clone(),
            reporter: self.reporter.clone(),
        }
    }
}

impl<A> WorkerContext<A> {
    pub(crate) fn new(
        id: usize,
        aux: Option<Arc<A>>,
        token: CancellationToken,
        reporter: ErrorReporter,
    ) -> Self {
        Self {
            id,
            aux,
            token,
            reporter,
        }
    }

    /// Slot index of the worker handling this packet.
    #[inline]
    pub fn worker_id(&self) -> usize {
        self.id
    }

    /// Auxiliary state of this slot, if the pool has an aux factory.
    ///
    /// The same instance survives worker restarts in the slot.
    #[inline]
    pub fn aux(&self) -> Option<&A> {
        self.aux.as_deref()
    }

    /// Shared handle to the slot's auxiliary state.
    pub fn aux_arc(&self) -> Option<Arc<A>> {
        self.aux.clone()
    }

    /// Cancels this worker only. Siblings and the pool are unaffected; the
    /// supervisor respawns the slot on its next tick.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once this worker (or the whole pool) was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when this worker is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Sends a message to the pool's error sink tagged with this worker id.
    pub fn report(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(worker = self.id, %message, "handler report");
        self.reporter.report(WorkerError::Reported {
            worker: self.id,
            message,
        });
    }
}

impl<A> fmt::Debug for WorkerContext<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("worker_id", &self.id)
            .field("has_aux", &self.aux.is_some())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// One dequeued payload plus the context of the worker handling it.
pub struct Packet<T, A = ()> {
    payload: Option<T>,
    ctx: WorkerContext<A>,
    worker_exit: bool,
}

impl<T, A> Packet<T, A> {
    pub(crate) fn new(payload: T, ctx: WorkerContext<A>) -> Self {
        Self {
            payload: Some(payload),
            ctx,
            worker_exit: false,
        }
    }

    /// The payload-less packet passed to the after hook when a worker dies.
    pub(crate) fn worker_exit(ctx: WorkerContext<A>) -> Self {
        Self {
            payload: None,
            ctx,
            worker_exit: true,
        }
    }

    /// Borrows the payload; `None` once taken or for a worker-exit packet.
    #[inline]
    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    /// Moves the payload out of the packet.
    #[inline]
    pub fn take_payload(&mut self) -> Option<T> {
        self.payload.take()
    }

    /// True for the packet an after hook receives when a handler panicked.
    #[inline]
    pub fn is_worker_exit(&self) -> bool {
        self.worker_exit
    }

    /// Context of the worker handling this packet.
    #[inline]
    pub fn ctx(&self) -> &WorkerContext<A> {
        &self.ctx
    }

    #[inline]
    pub fn worker_id(&self) -> usize {
        self.ctx.id
    }

    #[inline]
    pub fn aux(&self) -> Option<&A> {
        self.ctx.aux()
    }

    /// See [`WorkerContext::cancel`].
    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    /// See [`WorkerContext::report`].
    pub fn report(&self, message: impl Into<String>) {
        self.ctx.report(message);
    }
}

impl<T: fmt::Debug, A> fmt::Debug for Packet<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("payload", &self.payload)
            .field("worker_id", &self.ctx.id)
            .field("worker_exit", &self.worker_exit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Seen = Arc<Mutex<Vec<WorkerError>>>;

    fn ctx_with_sink(aux: Option<Arc<&'static str>>) -> (WorkerContext<&'static str>, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let reporter = ErrorReporter::new();
        let sink = Arc::clone(&seen);
        reporter.set(Some(Arc::new(move |e: WorkerError| {
            sink.lock().unwrap().push(e)
        })));
        (
            WorkerContext::new(7, aux, CancellationToken::new(), reporter),
            seen,
        )
    }

    #[test]
    fn report_reaches_sink_with_worker_id() {
        let (ctx, seen) = ctx_with_sink(None);
        let packet = Packet::new(1u32, ctx);
        packet.report("slow downstream");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].worker(), 7);
        assert!(seen[0].to_string().contains("slow downstream"));
    }

    #[test]
    fn cancel_only_touches_own_token() {
        let parent = CancellationToken::new();
        let ctx: WorkerContext =
            WorkerContext::new(0, None, parent.child_token(), ErrorReporter::new());
        let sibling = parent.child_token();

        Packet::new("x", ctx.clone()).cancel();
        assert!(ctx.is_cancelled());
        assert!(!sibling.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn payload_and_aux_access() {
        let (ctx, _) = ctx_with_sink(Some(Arc::new("conn")));
        let mut packet = Packet::new(String::from("job"), ctx.clone());
        assert_eq!(packet.aux(), Some(&"conn"));
        assert_eq!(packet.take_payload().as_deref(), Some("job"));
        assert!(packet.payload().is_none());
        assert!(!packet.is_worker_exit());

        let exit: Packet<String, _> = Packet::worker_exit(ctx);
        assert!(exit.is_worker_exit());
        assert!(exit.payload().is_none());
    }
}
