//! # Sum Example
//!
//! Four workers compete on a rendezvous queue and add up the numbers 1..=10.
//!
//! ## Run
//! ```bash
//! cargo run --example sum
//! ```

use std::{
    sync::Arc,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use queuevisor::{PoolBuilder, PoolConfig, WorkerContext};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = PoolConfig {
        worker_count: 4,
        ..PoolConfig::default()
    };
    let pool = PoolBuilder::<u64>::new(cfg)
        .with_error_sink(|err| eprintln!("worker error: {err}"))
        .build()?;

    let sum = Arc::new(AtomicU64::new(0));
    let total = Arc::clone(&sum);
    pool.handler(move |n: u64, ctx: WorkerContext| {
        let total = Arc::clone(&total);
        async move {
            println!("[worker {}] +{n}", ctx.worker_id());
            total.fetch_add(n, Ordering::SeqCst);
        }
    });

    for n in 1..=10 {
        pool.push(n).await;
    }
    pool.shutdown(Duration::from_secs(5)).await?;

    println!();
    println!("Result:");
    println!(" ├─► Sum:     {}", sum.load(Ordering::SeqCst));
    println!(" └─► Workers: {}", pool.worker_count());
    Ok(())
}
