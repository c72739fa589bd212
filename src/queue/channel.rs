//! # In-memory channel backend.
//!
//! [`ChannelQueue`] wraps a tokio `mpsc` channel whose receiver is shared by
//! all consumers through a [`QueueReader`].
//!
//! ## Capacity
//! - `capacity > 0` bounded buffer; `push` waits while the buffer is full.
//! - `capacity = 0` rendezvous; `push` waits until a consumer has taken the item.
//!
//! ## Close
//! `close()` cancels the queue token: pending pushes fail with
//! [`QueueError::Closed`], readers observe `None`, buffered items are dropped
//! with the queue.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{DurableQueue, Envelope, QueueReader};
use crate::error::QueueError;

/// Multi-producer, multi-consumer in-memory queue.
pub struct ChannelQueue<T> {
    tx: mpsc::Sender<Envelope<T>>,
    reader: QueueReader<T>,
    closed: CancellationToken,
    rendezvous: bool,
}

impl<T: Send + 'static> ChannelQueue<T> {
    /// Creates a queue; `capacity = 0` selects rendezvous semantics.
    pub fn new(capacity: usize) -> Self {
        let rendezvous = capacity == 0;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        Self {
            tx,
            reader: QueueReader::new(rx, closed.clone()),
            closed,
            rendezvous,
        }
    }

    /// True when `push` waits for a consumer.
    pub fn is_rendezvous(&self) -> bool {
        self.rendezvous
    }
}

#[async_trait]
impl<T: Send + 'static> DurableQueue<T> for ChannelQueue<T> {
    async fn push(&self, item: T) -> Result<(), QueueError> {
        if self.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }
        let (env, ack) = if self.rendezvous {
            let (env, ack) = Envelope::with_ack(item);
            (env, Some(ack))
        } else {
            (Envelope::new(item), None)
        };

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(QueueError::Closed),
            sent = self.tx.send(env) => sent.map_err(|_| QueueError::Closed)?,
        }

        if let Some(ack) = ack {
            tokio::select! {
                biased;
                taken = ack => taken.map_err(|_| QueueError::Closed)?,
                _ = self.closed.cancelled() => return Err(QueueError::Closed),
            }
        }
        Ok(())
    }

    fn reader(&self) -> QueueReader<T> {
        self.reader.clone()
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn depth(&self) -> u64 {
        (self.tx.max_capacity() - self.tx.capacity()) as u64
    }
}
