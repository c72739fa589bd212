//! # Handler abstraction.
//!
//! The [`Handle`] trait is what a worker invokes once per dequeued payload.
//! [`HandleRef`] is the shared form stored by the pool; registering a new
//! handler swaps it atomically for subsequent packets.
//!
//! Closures are adapted by [`HandleFn`](crate::HandleFn) and
//! [`TryHandleFn`](crate::TryHandleFn); implement the trait directly for
//! handlers that carry their own state.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::tasks::Packet;

/// Shared reference to a handler (`Arc<dyn Handle<T, A>>`).
pub type HandleRef<T, A = ()> = Arc<dyn Handle<T, A>>;

/// # Per-packet task logic.
///
/// Returning an error marks the payload as processed: the error is logged and
/// sent to the error sink, the payload is not retried. A panic tears the worker
/// down and loses the payload.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use queuevisor::{Handle, HandlerError, Packet};
///
/// struct Resize { max: u32 }
///
/// #[async_trait]
/// impl Handle<u32> for Resize {
///     async fn handle(&self, packet: &mut Packet<u32>) -> Result<(), HandlerError> {
///         match packet.take_payload() {
///             Some(n) if n > self.max => Err(HandlerError::fail(format!("{n} too large"))),
///             _ => Ok(()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Handle<T, A = ()>: Send + Sync + 'static
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    /// Processes one packet.
    async fn handle(&self, packet: &mut Packet<T, A>) -> Result<(), HandlerError>;
}
