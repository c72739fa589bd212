//! Routing of worker-level errors to the user's error sink.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::cell::HookCell;
use super::panic::panic_message;
use crate::error::WorkerError;

/// Receives every handler error, recovered panic and `report()` call.
pub type ErrorSink = Arc<dyn Fn(WorkerError) + Send + Sync>;

/// Shared handle to the pool's error sink slot.
///
/// Clones observe the same slot, so a sink installed after workers started is
/// seen by all of them.
#[derive(Clone)]
pub(crate) struct ErrorReporter {
    sink: Arc<HookCell<ErrorSink>>,
}

impl ErrorReporter {
    pub(crate) fn new() -> Self {
        Self {
            sink: Arc::new(HookCell::new()),
        }
    }

    pub(crate) fn set(&self, sink: Option<ErrorSink>) {
        self.sink.set(sink);
    }

    /// Delivers `err` to the sink, if one is installed. A panicking sink is
    /// logged and otherwise ignored.
    pub(crate) fn report(&self, err: WorkerError) {
        let Some(sink) = self.sink.get() else {
            return;
        };
        let worker = err.worker();
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| sink(err))) {
            tracing::error!(
                worker,
                info = %panic_message(&*panic),
                "error sink panicked"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn report_without_sink_is_noop() {
        ErrorReporter::new().report(WorkerError::NoHandler { worker: 0 });
    }

    #[test]
    fn clones_share_the_sink() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reporter = ErrorReporter::new();
        let clone = reporter.clone();

        let c = Arc::clone(&calls);
        reporter.set(Some(Arc::new(move |_: WorkerError| {
            c.fetch_add(1, Ordering::SeqCst);
        })));
        clone.report(WorkerError::NoHandler { worker: 1 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_sink_is_contained() {
        let reporter = ErrorReporter::new();
        reporter.set(Some(Arc::new(|_: WorkerError| panic!("sink broke"))));
        reporter.report(WorkerError::NoHandler { worker: 2 });
    }
}
