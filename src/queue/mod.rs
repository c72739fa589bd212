//! # Durable queues: the pluggable FIFO between producers and workers.
//!
//! [`DurableQueue`] is the capability contract every backend implements:
//! push an item, pop an item, hand out a shared read side, close.
//!
//! ## Backends
//! - [`ChannelQueue`] in-memory; bounded (`capacity > 0`) or rendezvous
//!   (`capacity = 0`, `push` completes only once a consumer took the item).
//! - [`DiskQueue`] append-only segment files with rotation, a total size cap,
//!   and restart persistence.
//!
//! ## Read side
//! Both backends expose the same [`QueueReader`]: a cloneable handle over one
//! multi-consumer channel. Workers compete on it, so they never know which
//! backend is in use.
//!
//! ```text
//!  push() ──► [ChannelQueue: mpsc buffer] ───────────────┐
//!                                                        ├──► QueueReader ──► Worker 0..N
//!  push() ──► [DiskQueue: io loop ─► segment files ─► ]──┘      (competing)
//! ```
//!
//! ## Rules
//! - Once `close()` is called, `push` fails with [`QueueError::Closed`] and
//!   every pending or future `recv` resolves to `None`.
//! - `close()` is idempotent.

mod channel;
mod disk;

use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;

pub use channel::ChannelQueue;
pub use disk::{DiskConfig, DiskLogFn, DiskQueue, LogLevel};

/// Shared handle to any queue backend.
pub type QueueRef<T> = Arc<dyn DurableQueue<T>>;

/// Capability contract of a task queue.
#[async_trait]
pub trait DurableQueue<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    /// Enqueues one item.
    ///
    /// Backends decide whether this waits: a rendezvous channel waits for a
    /// consumer, a bounded channel waits for room, the disk backend waits only
    /// for its own append.
    async fn push(&self, item: T) -> Result<(), QueueError>;

    /// Dequeues one item; `None` once the queue is closed.
    async fn pop(&self) -> Option<T> {
        self.reader().recv().await
    }

    /// Returns a receive-only handle over the queue's output.
    fn reader(&self) -> QueueReader<T>;

    /// Closes the queue. Idempotent.
    fn close(&self);

    /// True once [`close`](Self::close) was called.
    fn is_closed(&self) -> bool;

    /// Number of items accepted but not yet handed to a consumer.
    fn depth(&self) -> u64;

    /// Resolves once a closed backend has released its resources.
    ///
    /// Backends without background work resolve immediately.
    async fn wait_closed(&self) {}
}

/// An item in flight between a producer and the read side.
///
/// `ack` is set only for rendezvous pushes: the producer waits on it until a
/// consumer opens the envelope.
pub(crate) struct Envelope<T> {
    item: T,
    ack: Option<oneshot::Sender<()>>,
}

impl<T> Envelope<T> {
    pub(crate) fn new(item: T) -> Self {
        Self { item, ack: None }
    }

    pub(crate) fn with_ack(item: T) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { item, ack: Some(tx) }, rx)
    }

    fn open(self) -> T {
        if let Some(ack) = self.ack {
            let _ = ack.send(());
        }
        self.item
    }
}

/// Receive-only, multi-consumer side of a [`DurableQueue`].
///
/// Clones share the same underlying channel: each item is delivered to
/// exactly one of them.
pub struct QueueReader<T> {
    rx: Arc<Mutex<mpsc::Receiver<Envelope<T>>>>,
    closed: CancellationToken,
}

impl<T> Clone for QueueReader<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
            closed: self.closed.clone(),
        }
    }
}

impl<T: Send + 'static> QueueReader<T> {
    pub(crate) fn new(rx: mpsc::Receiver<Envelope<T>>, closed: CancellationToken) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
            closed,
        }
    }

    /// Waits for the next item. Returns `None` once the queue is closed.
    pub async fn recv(&self) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            env = async { self.rx.lock().await.recv().await } => env.map(Envelope::open),
        }
    }

    /// Drops items already handed to the read side but not yet received.
    ///
    /// Returns the number of discarded items. A consumer currently parked in
    /// [`recv`](Self::recv) holds the channel; nothing is drained then.
    pub(crate) fn drain(&self) -> usize {
        let Ok(mut rx) = self.rx.try_lock() else {
            return 0;
        };
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Converts the reader into a [`Stream`] of items that ends on close.
    pub fn into_stream(self) -> impl Stream<Item = T> + Send {
        futures::stream::unfold(self, |reader| async move {
            let item = reader.recv().await?;
            Some((item, reader))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn reader_stream_ends_on_close() {
        let q = ChannelQueue::new(4);
        q.push(1u32).await.unwrap();
        q.push(2u32).await.unwrap();

        let mut stream = Box::pin(q.reader().into_stream());
        assert_eq!(stream.next().await, Some(1));
        assert_eq!(stream.next().await, Some(2));

        q.close();
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn clones_compete_for_items() {
        let q = ChannelQueue::new(8);
        for i in 0..4u32 {
            q.push(i).await.unwrap();
        }
        let a = q.reader();
        let b = a.clone();

        let mut got = vec![
            a.recv().await.unwrap(),
            b.recv().await.unwrap(),
            a.recv().await.unwrap(),
            b.recv().await.unwrap(),
        ];
        got.sort_unstable();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }
}
