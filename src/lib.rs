//! # queuevisor
//!
//! **Queuevisor** is a self-healing, generic worker pool fed by a pluggable
//! durable queue.
//!
//! A fixed set of workers competes for payloads on one shared queue, hands each
//! payload to a registered handler, and contains every failure: handler errors
//! are reported, handler panics tear down only the affected worker, and a
//! supervisor respawns dead workers on a fixed interval. The queue is either an
//! in-memory channel or a disk-spillover queue that survives restarts.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   producers                       ┌──────────────────────────────────────┐
//!  push(T) ───────────────────────► │ DurableQueue<T>                      │
//!                                   │  ChannelQueue (rendezvous / bounded) │
//!                                   │  DiskQueue (segments + meta, fsync)  │
//!                                   └──────────────────┬───────────────────┘
//!                                                      ▼ QueueReader (competing)
//!            ┌──────────────────┬──────────────────────┼──────────────────┐
//!            ▼                  ▼                      ▼                  ▼
//!      ┌──────────┐       ┌──────────┐           ┌──────────┐       ┌──────────┐
//!      │ Worker 0 │       │ Worker 1 │    ...    │ Worker i │       │ Worker N │
//!      └────┬─────┘       └────┬─────┘           └────┬─────┘       └────┬─────┘
//!           │  rate limiter ─► handler(&mut Packet) ─► after hook        │
//!           │  errors / panics ─► error sink                             │
//!           ▼                                                            ▼
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │ Bus (broadcast): WorkerStarting, WorkerPanicked, WorkerRestarted, ...     │
//! └───────────────┬──────────────────────────────────────────┬────────────────┘
//!                 ▼                                          ▼
//!        subscriber_listener ─► SubscriberSet          Pool::subscribe()
//!
//!  Supervisor ── tick(supervisor_interval) ──► respawn Undefined/Stopped/Panicked slots
//! ```
//!
//! ### Worker lifecycle
//! ```text
//! Undefined ──start──► Running ──cancel / queue closed──► Stopped ──tick──► Running
//!                         │
//!                         └──handler panic──► Panicked ──tick──► Running (same slot, same aux)
//! ```
//!
//! ## Features
//! | Area              | Description                                                    | Key types / traits                         |
//! |-------------------|----------------------------------------------------------------|--------------------------------------------|
//! | **Pool**          | Submission, handler registration, rate limit, shutdown.        | [`Pool`], [`PoolBuilder`], [`PoolConfig`]  |
//! | **Handlers**      | Closures or objects invoked once per payload.                  | [`Handle`], [`Packet`], [`WorkerContext`]  |
//! | **Queues**        | Pluggable FIFO backends shared by all workers.                 | [`DurableQueue`], [`ChannelQueue`], [`DiskQueue`] |
//! | **Errors**        | Typed errors for queues, handlers, workers and shutdown.       | [`WorkerError`], [`QueueError`], [`PoolError`] |
//! | **Subscriber API**| Hook into worker lifecycle events.                             | [`Subscribe`], [`Event`]                   |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::time::Duration;
//! use queuevisor::{PoolBuilder, PoolConfig, WorkerContext};
//!
//! #[tokio::main(flavor = "multi_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = PoolConfig { worker_count: 4, ..PoolConfig::default() };
//!     let pool = PoolBuilder::<u64>::new(cfg)
//!         .with_error_sink(|err| eprintln!("{err}"))
//!         .build()?;
//!
//!     let sum = Arc::new(AtomicU64::new(0));
//!     let total = Arc::clone(&sum);
//!     pool.handler(move |n: u64, _ctx: WorkerContext| {
//!         let total = Arc::clone(&total);
//!         async move { total.fetch_add(n, Ordering::SeqCst); }
//!     });
//!
//!     // Rendezvous queue: each push returns once a worker took the payload.
//!     for n in 1..=10 {
//!         pool.push(n).await;
//!     }
//!     pool.shutdown(Duration::from_secs(5)).await?;
//!     assert_eq!(sum.load(Ordering::SeqCst), 55);
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod queue;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use crate::core::{
    AfterHook, AliveCounter, ErrorSink, Pool, PoolBuilder, PoolConfig, WorkerState,
};
pub use error::{HandlerError, PoolError, QueueError, RuntimeError, WorkerError};
pub use events::{Bus, Event, EventKind};
pub use queue::{
    ChannelQueue, DiskConfig, DiskLogFn, DiskQueue, DurableQueue, LogLevel, QueueReader, QueueRef,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{Handle, HandleFn, HandleRef, Packet, TryHandleFn, WorkerContext};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
