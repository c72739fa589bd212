//! Panic payload rendering and stack capture at the point of panic.
//!
//! Once a future has unwound into `catch_unwind`, the panicking frames are
//! gone. [`install_trace_hook`] chains a panic hook that records a backtrace
//! in a thread-local slot; the worker that recovers the panic on the same
//! thread picks it up with [`take_trace`].

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::Once;

/// Upper bound on the recorded trace.
const MAX_TRACE_BYTES: usize = 4096;

thread_local! {
    static LAST_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Renders a panic payload (`&str` or `String`) as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Installs the recording hook once per process, keeping the previous hook.
pub(crate) fn install_trace_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            LAST_TRACE.with(|slot| *slot.borrow_mut() = Some(bounded(trace)));
            previous(info);
        }));
    });
}

/// Takes the trace recorded by the last panic on this thread.
pub(crate) fn take_trace() -> String {
    LAST_TRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| bounded(Backtrace::force_capture().to_string()))
}

fn bounded(mut trace: String) -> String {
    if trace.len() > MAX_TRACE_BYTES {
        let mut cut = MAX_TRACE_BYTES;
        while !trace.is_char_boundary(cut) {
            cut -= 1;
        }
        trace.truncate(cut);
        trace.push_str("\n...");
    }
    trace
}
