//! Error types used by the queuevisor pool, its queues and its handlers.
//!
//! This module defines five enums:
//!
//! - [`QueueError`]: failures of a [`DurableQueue`](crate::DurableQueue) backend.
//! - [`HandlerError`]: errors returned by user handlers.
//! - [`WorkerError`]: reports delivered to the pool's error sink.
//! - [`PoolError`]: construction and configuration failures.
//! - [`RuntimeError`]: failures of the graceful shutdown sequence.
//!
//! All of them provide `as_label` (a short stable label for logs/metrics).

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by a queue backend.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum QueueError {
    /// The queue was closed; the item was not accepted.
    #[error("queue closed")]
    Closed,

    /// Encoded message is smaller than `min` or larger than `max`.
    #[error("invalid message size {size} (allowed {min}..={max})")]
    InvalidMessageSize {
        /// Encoded size of the rejected message.
        size: usize,
        /// Configured minimum message size.
        min: usize,
        /// Configured maximum message size.
        max: usize,
    },

    /// Writing the message would exceed the configured on-disk budget.
    #[error("disk queue full: {needed} bytes needed, limit {limit}")]
    DiskFull {
        /// Bytes on disk after the write would have completed.
        needed: u64,
        /// Configured `max_total_bytes`.
        limit: u64,
    },

    /// Payload could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Stored bytes could not be turned back into a payload.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// Underlying filesystem error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use queuevisor::QueueError;
    ///
    /// assert_eq!(QueueError::Closed.as_label(), "queue_closed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            QueueError::Closed => "queue_closed",
            QueueError::InvalidMessageSize { .. } => "queue_invalid_message_size",
            QueueError::DiskFull { .. } => "queue_disk_full",
            QueueError::Encode(_) => "queue_encode",
            QueueError::Decode(_) => "queue_decode",
            QueueError::Io(_) => "queue_io",
        }
    }
}

/// # Errors returned by a handler.
///
/// The pool never retries: a returned error is logged, forwarded to the error
/// sink, and the task counts as processed.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Task processing failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Handler observed cancellation and gave up on the task.
    #[error("context cancelled")]
    Canceled,
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        HandlerError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Fail { .. } => "handler_failed",
            HandlerError::Canceled => "handler_canceled",
        }
    }
}

/// # Reports delivered to the pool error sink.
///
/// Every variant carries the id of the worker slot it originated from.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum WorkerError {
    /// Handler returned an error.
    #[error("worker {worker}: handler error: {error}")]
    Handler {
        /// Worker slot id.
        worker: usize,
        /// Rendered handler error.
        error: String,
    },

    /// Handler panicked; the worker was torn down and the payload dropped.
    #[error("worker {worker}: panic recovered: {message}\n{trace}")]
    Panicked {
        /// Worker slot id.
        worker: usize,
        /// Panic payload rendered as text.
        message: String,
        /// Bounded stack trace captured at recovery.
        trace: String,
    },

    /// Error reported by handler code via [`WorkerContext::report`](crate::WorkerContext::report).
    #[error("worker {worker}: {message}")]
    Reported {
        /// Worker slot id.
        worker: usize,
        /// Free-form message.
        message: String,
    },

    /// A payload was dequeued while no handler was registered.
    #[error("worker {worker}: no handler registered, payload dropped")]
    NoHandler {
        /// Worker slot id.
        worker: usize,
    },
}

impl WorkerError {
    /// Returns the originating worker slot.
    pub fn worker(&self) -> usize {
        match self {
            WorkerError::Handler { worker, .. }
            | WorkerError::Panicked { worker, .. }
            | WorkerError::Reported { worker, .. }
            | WorkerError::NoHandler { worker } => *worker,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Handler { .. } => "worker_handler_error",
            WorkerError::Panicked { .. } => "worker_panicked",
            WorkerError::Reported { .. } => "worker_reported",
            WorkerError::NoHandler { .. } => "worker_no_handler",
        }
    }
}

/// # Errors produced while building or configuring a pool.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PoolError {
    /// Configuration failed validation.
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// What was wrong.
        reason: String,
    },

    /// The queue backend could not be opened (bad path, permissions, corrupt metadata).
    #[error("failed to open queue: {source}")]
    QueueOpen {
        /// Backend error.
        #[source]
        source: QueueError,
    },

    /// The pool has already been stopped.
    #[error("pool stopped")]
    Stopped,
}

impl PoolError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        PoolError::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PoolError::InvalidConfig { .. } => "pool_invalid_config",
            PoolError::QueueOpen { .. } => "pool_queue_open",
            PoolError::Stopped => "pool_stopped",
        }
    }
}

/// # Errors produced by the shutdown sequence.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Grace period elapsed while some workers were still running.
    #[error("shutdown timeout {grace:?} exceeded; {alive} workers still alive")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Workers still alive when the grace period ran out.
        alive: usize,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use queuevisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), alive: 2 };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_error_carries_slot() {
        let err = WorkerError::Panicked {
            worker: 3,
            message: "boom".into(),
            trace: String::new(),
        };
        assert_eq!(err.worker(), 3);
        assert_eq!(err.as_label(), "worker_panicked");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn queue_error_labels() {
        let full = QueueError::DiskFull {
            needed: 10,
            limit: 5,
        };
        assert_eq!(full.as_label(), "queue_disk_full");
        assert_eq!(
            full.to_string(),
            "disk queue full: 10 bytes needed, limit 5"
        );
    }

    #[test]
    fn handler_error_fail_shorthand() {
        let err = HandlerError::fail("nope");
        assert_eq!(err.as_label(), "handler_failed");
        assert_eq!(err.to_string(), "execution failed: nope");
    }
}
