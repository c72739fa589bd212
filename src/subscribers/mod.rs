//! # Event subscribers for the pool.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`]
//! fan-out used to deliver pool [`Event`](crate::Event)s to user code.
//!
//! ## Architecture
//! ```text
//! Worker/Supervisor ── publish(Event) ──► Bus ──► subscriber_listener
//!                                                        │
//!                                                 SubscriberSet::emit
//!                                            ┌───────────┼───────────┐
//!                                            ▼           ▼           ▼
//!                                        [queue S1]  [queue S2]  [queue SN]
//!                                            │           │           │
//!                                        on_event()  on_event()  on_event()
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use queuevisor::{Event, EventKind, Subscribe};
//! use async_trait::async_trait;
//!
//! struct PanicCounter;
//!
//! #[async_trait]
//! impl Subscribe for PanicCounter {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::WorkerPanicked {
//!             // increment a counter
//!         }
//!     }
//!     fn name(&self) -> &'static str { "panic-counter" }
//! }
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
