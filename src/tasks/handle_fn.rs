//! # Closure-backed handlers.
//!
//! [`HandleFn`] wraps `F: Fn(T, WorkerContext<A>) -> Fut` for handlers that do
//! not fail; [`TryHandleFn`] wraps the fallible form returning
//! `Result<(), HandlerError>`. Each call creates a fresh future that owns the
//! payload and a clone of the worker context.
//!
//! The payload is moved out of the [`Packet`], so an after hook running behind
//! a closure handler sees `payload() == None`.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::tasks::{Handle, Packet, WorkerContext};

/// Infallible closure handler.
#[derive(Debug)]
pub struct HandleFn<F> {
    f: F,
}

impl<F> HandleFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the handler as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<T, A, F, Fut> Handle<T, A> for HandleFn<F>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
    F: Fn(T, WorkerContext<A>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, packet: &mut Packet<T, A>) -> Result<(), HandlerError> {
        if let Some(payload) = packet.take_payload() {
            (self.f)(payload, packet.ctx().clone()).await;
        }
        Ok(())
    }
}

/// Fallible closure handler.
#[derive(Debug)]
pub struct TryHandleFn<F> {
    f: F,
}

impl<F> TryHandleFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the handler as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<T, A, F, Fut> Handle<T, A> for TryHandleFn<F>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
    F: Fn(T, WorkerContext<A>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, packet: &mut Packet<T, A>) -> Result<(), HandlerError> {
        match packet.take_payload() {
            Some(payload) => (self.f)(payload, packet.ctx().clone()).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorReporter;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio_util::sync::CancellationToken;

    fn packet<T>(payload: T) -> Packet<T> {
        Packet::new(
            payload,
            WorkerContext::new(0, None, CancellationToken::new(), ErrorReporter::new()),
        )
    }

    #[tokio::test]
    async fn handle_fn_consumes_payload() {
        let sum = Arc::new(AtomicU64::new(0));
        let s = Arc::clone(&sum);
        let h = HandleFn::new(move |n: u64, _ctx: WorkerContext| {
            let s = Arc::clone(&s);
            async move {
                s.fetch_add(n, Ordering::SeqCst);
            }
        });

        let mut p = packet(5u64);
        h.handle(&mut p).await.unwrap();
        assert!(p.payload().is_none());
        assert_eq!(sum.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn try_handle_fn_propagates_error() {
        let h = TryHandleFn::new(|n: u8, _ctx: WorkerContext| async move {
            if n == 3 {
                Err(HandlerError::fail("three"))
            } else {
                Ok(())
            }
        });
        assert!(h.handle(&mut packet(1u8)).await.is_ok());
        let err = h.handle(&mut packet(3u8)).await.unwrap_err();
        assert_eq!(err.as_label(), "handler_failed");
    }
}
