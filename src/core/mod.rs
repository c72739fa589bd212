//! Pool core: workers, supervision and the public pool handle.
//!
//! The only public API from this module is [`Pool`], its [`PoolBuilder`] and
//! [`PoolConfig`], plus the observable [`WorkerState`] and [`AliveCounter`].
//!
//! Internal modules:
//! - [`worker`]: one competing consumer with panic isolation;
//! - [`supervisor`]: periodic health check that respawns non-running slots;
//! - [`shared`]: state shared by the pool handle, supervisor and workers;
//! - [`report`]: routing of worker errors to the error sink;
//! - [`panic`]: panic payload rendering and trace capture;
//! - [`shutdown`]: cross-platform termination signal handling.

mod alive;
mod builder;
mod cell;
mod config;
mod panic;
mod pool;
mod report;
mod shared;
mod shutdown;
mod supervisor;
mod worker;

pub use alive::AliveCounter;
pub use builder::PoolBuilder;
pub use config::PoolConfig;
pub use pool::Pool;
pub use report::ErrorSink;
pub use shared::AfterHook;
pub use worker::WorkerState;

pub(crate) use config::duration_millis;
pub(crate) use panic::panic_message;
pub(crate) use report::ErrorReporter;
