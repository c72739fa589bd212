//! # Panic Recovery Example
//!
//! Two workers process the numbers 1..=5; the handler panics on 3. The panic
//! takes down one worker, the error sink receives the panic with its trace,
//! and the supervisor brings the slot back on the next tick.
//!
//! Requires the `logging` feature for the built-in [`LogWriter`](queuevisor::LogWriter).
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example panic_recovery --features logging
//! ```

use std::{
    sync::Arc,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use queuevisor::{LogWriter, PoolBuilder, PoolConfig, Subscribe, WorkerContext, WorkerError};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = PoolConfig {
        worker_count: 2,
        ..PoolConfig::default()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let pool = PoolBuilder::<u64>::new(cfg)
        .with_subscribers(subs)
        .with_error_sink(|err| match err {
            WorkerError::Panicked {
                worker,
                message,
                trace,
            } => {
                let first = trace.lines().next().unwrap_or("");
                eprintln!("worker {worker} panicked: {message} (trace: {first} ...)");
            }
            other => eprintln!("{other}"),
        })
        .build()?;

    let processed = Arc::new(AtomicUsize::new(0));
    let p = Arc::clone(&processed);
    pool.handler(move |n: u64, _ctx: WorkerContext| {
        let p = Arc::clone(&p);
        async move {
            if n == 3 {
                panic!("cannot handle {n}");
            }
            p.fetch_add(1, Ordering::SeqCst);
        }
    });

    for n in 1..=5 {
        pool.push(n).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("alive after panic: {}", pool.alive());

    tokio::time::sleep(Duration::from_millis(1200)).await;
    println!("alive after supervisor tick: {}", pool.alive());

    pool.shutdown(Duration::from_secs(5)).await?;

    println!();
    println!("Result:");
    println!(" ├─► Processed: {}", processed.load(Ordering::SeqCst));
    println!(" └─► Restarts:  {}", pool.restarts());
    Ok(())
}
