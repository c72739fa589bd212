//! # Handler-facing types.
//!
//! This module provides what task logic sees of the pool:
//! - [`Packet`] - one dequeued payload plus its worker context
//! - [`WorkerContext`] - worker id, aux state, self-cancel, error reporting
//! - [`Handle`] - trait for implementing handlers
//! - [`HandleFn`] / [`TryHandleFn`] - closure-backed handlers
//! - [`HandleRef`] - shared reference to a handler (`Arc<dyn Handle<T, A>>`)

mod handle;
mod handle_fn;
mod packet;

pub use handle::{Handle, HandleRef};
pub use handle_fn::{HandleFn, TryHandleFn};
pub use packet::{Packet, WorkerContext};
