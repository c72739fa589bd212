//! # Disk Spill Example
//!
//! A pool backed by the disk queue with a deliberately tiny size cap. The slow
//! handler lets the queue fill up; rejected writes are reported through the
//! disk log callback while producers keep going.
//!
//! ## Run
//! ```bash
//! cargo run --example disk_spill
//! ```

use std::time::Duration;

use queuevisor::{DiskConfig, LogLevel, PoolBuilder, PoolConfig, WorkerContext};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Job {
    id: u32,
    body: String,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let dir = std::env::temp_dir().join("queuevisor-disk-spill");
    let mut disk = DiskConfig::new("jobs", &dir);
    disk.max_total_bytes = 512;
    disk.max_bytes_per_file = 256;

    let cfg = PoolConfig {
        worker_count: 2,
        disk: Some(disk),
        ..PoolConfig::default()
    };
    let pool = PoolBuilder::<Job>::new(cfg)
        .with_disk_log(|level, msg| {
            if level >= LogLevel::Warn {
                eprintln!("[disk {level}] {msg}");
            }
        })
        .build_durable()
        .await?;

    pool.handler(|job: Job, ctx: WorkerContext| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        println!("[worker {}] job {} done: {}", ctx.worker_id(), job.id, job.body);
    });

    for id in 0..20 {
        let job = Job {
            id,
            body: format!("payload-{id}"),
        };
        pool.push(job).await;
    }
    println!("queued, depth on disk: {}", pool.queue().depth());

    tokio::time::sleep(Duration::from_secs(2)).await;
    pool.shutdown(Duration::from_secs(5)).await?;
    println!("dir: {}", dir.display());
    Ok(())
}
