//! # Events emitted by workers, the supervision loop and the pool.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Worker lifecycle**: start, clean exit, panic, respawn
//! - **Task outcomes**: handler failures, rejected pushes
//! - **Shutdown**: stop requested, drained within grace, grace exceeded
//! - **Subscriber health**: overflow, panic
//!
//! The [`Event`] struct carries metadata such as timestamps, the worker slot,
//! and a human-readable reason.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use queuevisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TaskFailed)
//!     .with_worker(3)
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::TaskFailed);
//! assert_eq!(ev.worker, Some(3));
//! assert_eq!(ev.reason.as_deref(), Some("boom"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of pool events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets `reason` to `subscriber=<name> info=<panic>`.
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets `reason` to `subscriber=<name> reason=<full|closed>`.
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal observed).
    ShutdownRequested,

    /// All workers exited within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some workers did not exit in time.
    ///
    /// Sets `reason` to the number of workers still alive.
    GraceExceeded,

    // === Worker lifecycle events ===
    /// Worker entered its run loop.
    ///
    /// Sets `worker`.
    WorkerStarting,

    /// Worker left its run loop without panicking (cancellation or queue closure).
    ///
    /// Sets `worker`, `reason` (`cancelled` or `queue_closed`).
    WorkerStopped,

    /// Worker recovered a handler panic and tore itself down.
    ///
    /// Sets `worker`, `reason` (panic message).
    WorkerPanicked,

    /// Supervisor replaced a non-running worker slot.
    ///
    /// Sets `worker`, `reason` (previous state: `undefined`, `stopped`, `panicked`).
    WorkerRestarted,

    // === Task outcome events ===
    /// Handler returned an error for one payload.
    ///
    /// Sets `worker`, `reason` (error message).
    TaskFailed,

    /// Queue backend rejected a push.
    ///
    /// Sets `reason` (queue error).
    PushFailed,
}

/// Pool event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Worker slot, if applicable.
    pub worker: Option<usize>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            reason: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a worker slot id.
    #[inline]
    pub fn with_worker(mut self, worker: usize) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} info={info}"))
    }

    /// True for events that originate from the subscriber machinery itself.
    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::new(EventKind::WorkerStarting);
        let b = Event::new(EventKind::WorkerStopped);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn subscriber_events_are_flagged() {
        assert!(Event::subscriber_overflow("s", "full").is_subscriber_event());
        assert!(!Event::new(EventKind::TaskFailed).is_subscriber_event());
    }
}
