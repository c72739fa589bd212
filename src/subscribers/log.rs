//! # LogWriter: event renderer over `tracing`
//!
//! A minimal subscriber that forwards incoming [`Event`]s to `tracing`.
//! Worker panics and grace overruns go out at `warn`/`error`, routine
//! lifecycle at `info`/`debug`.

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::WorkerStarting => {
                tracing::debug!(worker = ?e.worker, "[starting]");
            }
            EventKind::WorkerStopped => {
                tracing::debug!(worker = ?e.worker, reason, "[stopped]");
            }
            EventKind::WorkerRestarted => {
                tracing::info!(worker = ?e.worker, previous = reason, "[restarted]");
            }
            EventKind::WorkerPanicked => {
                tracing::error!(worker = ?e.worker, reason, "[panicked]");
            }
            EventKind::TaskFailed => {
                tracing::warn!(worker = ?e.worker, err = reason, "[task-failed]");
            }
            EventKind::PushFailed => {
                tracing::warn!(err = reason, "[push-failed]");
            }
            EventKind::ShutdownRequested => {
                tracing::info!("[shutdown-requested]");
            }
            EventKind::AllStoppedWithin => {
                tracing::info!("[all-stopped-within-grace]");
            }
            EventKind::GraceExceeded => {
                tracing::error!(alive = reason, "[grace-exceeded]");
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(reason, "[subscriber-overflow]");
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(reason, "[subscriber-panicked]");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
