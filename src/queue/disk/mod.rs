//! # Disk-spillover backend.
//!
//! [`DiskQueue`] persists every pushed item to append-only segment files and
//! serves them back in FIFO order, surviving process restarts.
//!
//! ## Layout
//! ```text
//! <dir>/<name>.diskqueue.000000.dat   ┐
//! <dir>/<name>.diskqueue.000001.dat   ├─ segments: [u32 BE length][json payload]...
//! <dir>/<name>.diskqueue.000002.dat   ┘
//! <dir>/<name>.diskqueue.meta.dat     ── depth + read/write cursors
//! ```
//!
//! ## Limits
//! - `max_bytes_per_file`: a segment is rotated once its size reaches it.
//! - `max_total_bytes`: bytes held by live segments; writes past it fail with
//!   [`QueueError::DiskFull`] (`0` = unlimited).
//! - `min_msg_size..=max_msg_size`: encoded payload bounds.
//!
//! ## Diagnostics
//! Every failure is logged with `tracing` and passed to the optional
//! [`DiskLogFn`] along with a [`LogLevel`].

mod ioloop;
mod meta;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use self::ioloop::{EmptyRequest, IoLoop, Wiring, WriteRequest};
use super::{DurableQueue, QueueReader};
use crate::core::duration_millis;
use crate::error::QueueError;

/// Severity passed to a [`DiskLogFn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        })
    }
}

/// Sink for disk queue diagnostics, including rejected writes.
pub type DiskLogFn = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Settings of a [`DiskQueue`].
///
/// ## Field semantics
/// - `name`: file prefix; two queues in one directory need distinct names
/// - `max_total_bytes`: cap on bytes held by live segments (`0` = unlimited)
/// - `max_bytes_per_file`: segment rotation threshold
/// - `sync_every`: fsync after this many writes
/// - `sync_timeout`: fsync at least this often while dirty
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Queue name, used as the file prefix.
    pub name: String,
    /// Directory holding segments and metadata. Created if missing.
    pub dir: PathBuf,
    /// Maximum bytes across live segments (`0` = unlimited).
    pub max_total_bytes: u64,
    /// Segment rotation threshold in bytes.
    pub max_bytes_per_file: u64,
    /// Smallest accepted encoded payload.
    pub min_msg_size: usize,
    /// Largest accepted encoded payload.
    pub max_msg_size: usize,
    /// Number of writes between forced syncs.
    pub sync_every: u64,
    /// Longest time dirty data stays unsynced.
    #[serde(rename = "sync_timeout_ms", with = "duration_millis")]
    pub sync_timeout: Duration,
}

impl DiskConfig {
    /// Creates a config with default limits for the given name and directory.
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Checks the limits are coherent.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("disk queue name must not be empty".into());
        }
        if self.max_bytes_per_file == 0 {
            return Err("max_bytes_per_file must be > 0".into());
        }
        if self.min_msg_size > self.max_msg_size {
            return Err(format!(
                "min_msg_size {} exceeds max_msg_size {}",
                self.min_msg_size, self.max_msg_size
            ));
        }
        if self.max_msg_size > u32::MAX as usize {
            return Err("max_msg_size must fit in 32 bits".into());
        }
        if self.sync_every == 0 {
            return Err("sync_every must be >= 1".into());
        }
        if self.sync_timeout.is_zero() {
            return Err("sync_timeout must be > 0".into());
        }
        Ok(())
    }
}

impl Default for DiskConfig {
    /// Default configuration:
    ///
    /// - `max_total_bytes = 0` (unlimited)
    /// - `max_bytes_per_file = 100 MiB`
    /// - `min_msg_size = 0`, `max_msg_size = 1 MiB`
    /// - `sync_every = 2500`, `sync_timeout = 2s`
    fn default() -> Self {
        Self {
            name: "queue".to_string(),
            dir: PathBuf::from("."),
            max_total_bytes: 0,
            max_bytes_per_file: 100 * 1024 * 1024,
            min_msg_size: 0,
            max_msg_size: 1024 * 1024,
            sync_every: 2500,
            sync_timeout: Duration::from_secs(2),
        }
    }
}

/// Persistent FIFO queue over segment files.
///
/// Items are encoded with `serde_json`. A single background task owns the
/// files; this handle only exchanges messages with it.
pub struct DiskQueue<T> {
    name: String,
    write_tx: mpsc::Sender<WriteRequest>,
    empty_tx: mpsc::Sender<EmptyRequest>,
    reader: QueueReader<T>,
    closed: CancellationToken,
    depth: Arc<AtomicU64>,
    log: Option<DiskLogFn>,
    io: Mutex<Option<JoinHandle<()>>>,
}

impl<T> DiskQueue<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Opens (or creates) the queue and starts its I/O task.
    ///
    /// Must be called from within a tokio runtime. Fails when the directory
    /// cannot be created, metadata is corrupt, or the active segment cannot be
    /// opened for writing.
    pub async fn open(cfg: DiskConfig, log: Option<DiskLogFn>) -> Result<Self, QueueError> {
        cfg.validate().map_err(|reason| {
            QueueError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                reason,
            ))
        })?;

        let name = cfg.name.clone();
        let depth = Arc::new(AtomicU64::new(0));
        let io = IoLoop::<T>::open(cfg, log.clone(), Arc::clone(&depth)).await?;

        let (read_tx, read_rx) = mpsc::channel(1);
        let (write_tx, write_rx) = mpsc::channel(64);
        let (empty_tx, empty_rx) = mpsc::channel(1);
        let closed = CancellationToken::new();

        let handle = tokio::spawn(io.run(Wiring {
            read_tx,
            write_rx,
            empty_rx,
            closed: closed.clone(),
        }));

        Ok(Self {
            name,
            write_tx,
            empty_tx,
            reader: QueueReader::new(read_rx, closed.clone()),
            closed,
            depth,
            log,
            io: Mutex::new(Some(handle)),
        })
    }

    /// Queue name (file prefix).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deletes all stored items and restarts on a fresh segment.
    pub async fn empty(&self) -> Result<(), QueueError> {
        let (reply, rx) = oneshot::channel();
        self.empty_tx
            .send(reply)
            .await
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)??;
        let dropped = self.reader.drain();
        if dropped > 0 {
            tracing::debug!(queue = %self.name, dropped, "discarded handed-off items");
        }
        Ok(())
    }

    fn report(&self, level: LogLevel, msg: &str) {
        if let Some(log) = &self.log {
            log(level, msg);
        }
    }
}

#[async_trait]
impl<T> DurableQueue<T> for DiskQueue<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    async fn push(&self, item: T) -> Result<(), QueueError> {
        if self.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }
        let data = match serde_json::to_vec(&item) {
            Ok(data) => data,
            Err(e) => {
                let err = QueueError::Encode(e);
                tracing::error!(queue = %self.name, error = %err, "rejected write");
                self.report(LogLevel::Error, &format!("rejected write: {err}"));
                return Err(err);
            }
        };

        let (reply, rx) = oneshot::channel();
        self.write_tx
            .send(WriteRequest { data, reply })
            .await
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)?
    }

    fn reader(&self) -> QueueReader<T> {
        self.reader.clone()
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn depth(&self) -> u64 {
        self.depth.load(Ordering::Acquire)
    }

    /// Waits until the I/O task has synced metadata and exited.
    async fn wait_closed(&self) {
        if let Some(handle) = self.io.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(queue = %self.name, error = %e, "disk queue task failed");
            }
        }
    }
}

impl<T> Drop for DiskQueue<T> {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn collecting_log() -> (DiskLogFn, Arc<StdMutex<Vec<(LogLevel, String)>>>) {
        let lines = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let log: DiskLogFn = Arc::new(move |level, msg: &str| {
            sink.lock().unwrap().push((level, msg.to_string()));
        });
        (log, lines)
    }

    async fn recv(q: &DiskQueue<String>) -> String {
        tokio::time::timeout(Duration::from_secs(2), q.pop())
            .await
            .expect("timed out waiting for item")
            .expect("queue closed")
    }

    #[tokio::test]
    async fn fifo_across_rotated_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = DiskConfig::new("rot", dir.path());
        cfg.max_bytes_per_file = 32;
        let q = DiskQueue::<String>::open(cfg, None).await.unwrap();

        for i in 0..10 {
            q.push(format!("message-{i}")).await.unwrap();
        }
        assert!(dir.path().join("rot.diskqueue.000003.dat").exists());

        for i in 0..10 {
            assert_eq!(recv(&q).await, format!("message-{i}"));
        }
        q.close();
        q.wait_closed().await;
        assert!(!dir.path().join("rot.diskqueue.000000.dat").exists());
    }

    #[tokio::test]
    async fn total_cap_rejects_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let (log, lines) = collecting_log();
        let mut cfg = DiskConfig::new("cap", dir.path());
        cfg.max_total_bytes = 20;
        let q = DiskQueue::<String>::open(cfg, Some(log)).await.unwrap();

        // "\"abcdefgh\"" encodes to 10 bytes, framed 14.
        q.push("abcdefgh".to_string()).await.unwrap();
        let err = q.push("abcdefgh".to_string()).await.unwrap_err();
        assert!(matches!(err, QueueError::DiskFull { limit: 20, .. }));

        let lines = lines.lock().unwrap();
        assert!(
            lines
                .iter()
                .any(|(lvl, msg)| *lvl == LogLevel::Error && msg.contains("disk queue full"))
        );
    }

    #[tokio::test]
    async fn message_size_bounds_are_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = DiskConfig::new("size", dir.path());
        cfg.min_msg_size = 4;
        cfg.max_msg_size = 8;
        let q = DiskQueue::<String>::open(cfg, None).await.unwrap();

        assert!(matches!(
            q.push(String::new()).await,
            Err(QueueError::InvalidMessageSize { size: 2, .. })
        ));
        assert!(matches!(
            q.push("much too long".to_string()).await,
            Err(QueueError::InvalidMessageSize { .. })
        ));
        q.push("ok".to_string()).await.unwrap();
        assert_eq!(recv(&q).await, "ok");
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DiskConfig::new("persist", dir.path());
        {
            let q = DiskQueue::<String>::open(cfg.clone(), None).await.unwrap();
            for i in 0..3 {
                q.push(format!("job-{i}")).await.unwrap();
            }
            // Give the loop time to park job-0 in the read channel.
            tokio::time::sleep(Duration::from_millis(50)).await;
            q.close();
            q.wait_closed().await;
        }

        let q = DiskQueue::<String>::open(cfg, None).await.unwrap();
        assert_eq!(q.depth(), 3);
        for i in 0..3 {
            assert_eq!(recv(&q).await, format!("job-{i}"));
        }
        q.close();
        q.wait_closed().await;
    }

    #[tokio::test]
    async fn consumed_items_are_not_redelivered() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DiskConfig::new("resume", dir.path());
        {
            let q = DiskQueue::<String>::open(cfg.clone(), None).await.unwrap();
            for i in 0..3 {
                q.push(format!("job-{i}")).await.unwrap();
            }
            assert_eq!(recv(&q).await, "job-0");
            q.close();
            q.wait_closed().await;
        }

        let q = DiskQueue::<String>::open(cfg, None).await.unwrap();
        assert_eq!(recv(&q).await, "job-1");
        assert_eq!(recv(&q).await, "job-2");
        q.close();
        q.wait_closed().await;
    }

    #[tokio::test]
    async fn drained_space_is_reusable_under_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = DiskConfig::new("drain", dir.path());
        cfg.max_total_bytes = 20;
        let q = DiskQueue::<String>::open(cfg, None).await.unwrap();

        for round in 0..5 {
            q.push(format!("abcdefg{round}")).await.unwrap();
            assert_eq!(recv(&q).await, format!("abcdefg{round}"));
        }
        q.push("abcdefgh".to_string()).await.unwrap();
        assert!(matches!(
            q.push("abcdefgh".to_string()).await,
            Err(QueueError::DiskFull { limit: 20, .. })
        ));
        q.close();
        q.wait_closed().await;
        assert!(!dir.path().join("drain.diskqueue.000000.dat").exists());
    }

    fn frame(data: &[u8]) -> Vec<u8> {
        let mut out = (data.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(data);
        out
    }

    fn write_meta(dir: &Path, name: &str, raw: &str) {
        std::fs::write(dir.join(format!("{name}.diskqueue.meta.dat")), raw).unwrap();
    }

    #[tokio::test]
    async fn corrupt_segment_is_renamed_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut broken = vec![0xff, 0xff, 0xff, 0xff];
        broken.extend_from_slice(b"garbage");
        let good = frame(b"\"after\"");
        std::fs::write(dir.path().join("bad.diskqueue.000000.dat"), &broken).unwrap();
        std::fs::write(dir.path().join("bad.diskqueue.000001.dat"), &good).unwrap();
        write_meta(dir.path(), "bad", &format!("2\n0,0\n1,{}\n", good.len()));

        let (log, lines) = collecting_log();
        let q = DiskQueue::<String>::open(DiskConfig::new("bad", dir.path()), Some(log))
            .await
            .unwrap();

        assert_eq!(recv(&q).await, "after");
        assert!(dir.path().join("bad.diskqueue.000000.dat.bad").exists());
        assert!(!dir.path().join("bad.diskqueue.000000.dat").exists());
        assert!(
            lines
                .lock()
                .unwrap()
                .iter()
                .any(|(lvl, msg)| *lvl == LogLevel::Error && msg.contains("invalid message size"))
        );
        q.close();
        q.wait_closed().await;
    }

    #[tokio::test]
    async fn undecodable_message_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = frame(b"{not json");
        segment.extend_from_slice(&frame(b"\"ok\""));
        std::fs::write(dir.path().join("skip.diskqueue.000000.dat"), &segment).unwrap();
        write_meta(dir.path(), "skip", &format!("2\n0,0\n0,{}\n", segment.len()));

        let (log, lines) = collecting_log();
        let q = DiskQueue::<String>::open(DiskConfig::new("skip", dir.path()), Some(log))
            .await
            .unwrap();

        assert_eq!(recv(&q).await, "ok");
        assert!(
            lines
                .lock()
                .unwrap()
                .iter()
                .any(|(lvl, msg)| *lvl == LogLevel::Error && msg.contains("skipping message at 0:0"))
        );
        q.close();
        q.wait_closed().await;
    }

    #[tokio::test]
    async fn unsynced_tail_stays_readable_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = frame(b"\"a\"");
        segment.extend_from_slice(&frame(b"\"b\""));
        std::fs::write(dir.path().join("tail.diskqueue.000000.dat"), &segment).unwrap();
        // Metadata synced after the first write only.
        write_meta(dir.path(), "tail", "1\n0,0\n0,7\n");

        let (log, lines) = collecting_log();
        let q = DiskQueue::<String>::open(DiskConfig::new("tail", dir.path()), Some(log))
            .await
            .unwrap();
        assert!(
            lines
                .lock()
                .unwrap()
                .iter()
                .any(|(lvl, msg)| *lvl == LogLevel::Warn && msg.contains("starting a new segment"))
        );

        q.push("c".to_string()).await.unwrap();
        assert!(dir.path().join("tail.diskqueue.000001.dat").exists());
        assert_eq!(recv(&q).await, "a");
        assert_eq!(recv(&q).await, "b");
        assert_eq!(recv(&q).await, "c");
        q.close();
        q.wait_closed().await;
    }

    async fn wait_for_meta(dir: &Path, name: &str, expected: &str) {
        let path = dir.join(format!("{name}.diskqueue.meta.dat"));
        for _ in 0..200 {
            if std::fs::read_to_string(&path).ok().as_deref() == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "metadata never became {expected:?}, last: {:?}",
            std::fs::read_to_string(&path).ok()
        );
    }

    #[tokio::test]
    async fn metadata_synced_after_sync_every_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = DiskConfig::new("every", dir.path());
        cfg.sync_every = 2;
        cfg.sync_timeout = Duration::from_secs(60);
        let q = DiskQueue::<String>::open(cfg, None).await.unwrap();

        // "\"a\"" is 3 bytes, framed 7.
        q.push("a".to_string()).await.unwrap();
        q.push("a".to_string()).await.unwrap();
        wait_for_meta(dir.path(), "every", "2\n0,0\n0,14\n").await;
    }

    #[tokio::test]
    async fn metadata_synced_after_sync_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = DiskConfig::new("timer", dir.path());
        cfg.sync_timeout = Duration::from_millis(50);
        let q = DiskQueue::<String>::open(cfg, None).await.unwrap();

        q.push("a".to_string()).await.unwrap();
        wait_for_meta(dir.path(), "timer", "1\n0,0\n0,7\n").await;
    }

    #[tokio::test]
    async fn payloads_need_not_be_sync() {
        use std::cell::Cell;

        let dir = tempfile::tempdir().unwrap();
        let q = DiskQueue::<Cell<u32>>::open(DiskConfig::new("cells", dir.path()), None)
            .await
            .unwrap();
        q.push(Cell::new(7)).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), q.pop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.get(), 7);
    }

    #[tokio::test]
    async fn empty_discards_everything() {
        let dir = tempfile::tempdir().unwrap();
        let q = DiskQueue::<String>::open(DiskConfig::new("wipe", dir.path()), None)
            .await
            .unwrap();
        q.close();
        assert!(matches!(q.push("x".into()).await, Err(QueueError::Closed)));

        let q = DiskQueue::<String>::open(DiskConfig::new("wipe2", dir.path()), None)
            .await
            .unwrap();
        q.push("a".into()).await.unwrap();
        q.push("b".into()).await.unwrap();
        q.empty().await.unwrap();
        assert_eq!(q.depth(), 0);

        q.push("c".into()).await.unwrap();
        assert_eq!(recv(&q).await, "c");
    }

    #[tokio::test]
    async fn open_fails_on_unusable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let res = DiskQueue::<String>::open(DiskConfig::new("q", &file), None).await;
        assert!(res.is_err());
    }

    #[test]
    fn validate_rejects_inverted_sizes() {
        let mut cfg = DiskConfig::new("q", "/tmp");
        cfg.min_msg_size = 10;
        cfg.max_msg_size = 5;
        assert!(cfg.validate().is_err());
        assert!(DiskConfig::new("q", "/tmp").validate().is_ok());
    }
}
