//! The single task that owns every file of a disk queue.
//!
//! All writes, reads, rotations and syncs happen here, so the cursor needs no
//! locking. Producers talk to the loop through a request channel and wait for
//! the write result; consumers receive decoded items through the one-slot
//! read channel shared by every [`QueueReader`](crate::QueueReader).
//!
//! ```text
//!   push() ── WriteRequest ──► ┌──────────┐ ── Envelope<T> ──► readers
//!   empty() ─ EmptyRequest ──► │  IoLoop  │
//!   close() ─ cancel token ──► └────┬─────┘
//!                                   ▼
//!                    <name>.diskqueue.NNNNNN.dat  +  meta.dat
//! ```
//!
//! ## Rules
//! - A message is committed (cursor advanced, depth decremented) only once a
//!   reader has taken it out of the read channel. One message is in flight at
//!   a time; if the queue closes first it stays on disk and is delivered again
//!   after reopening.
//! - When the read cursor catches up with the write cursor the active segment
//!   is retired, so a drained queue holds no bytes against `max_total_bytes`.
//! - Fully consumed segments are deleted.
//! - Corrupt segments are renamed to `*.bad` and skipped.

use std::io::{self, SeekFrom};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::meta::{self, Cursor};
use super::{DiskConfig, DiskLogFn, LogLevel};
use crate::error::QueueError;
use crate::queue::Envelope;

/// Size of the big-endian length prefix in front of each message.
const FRAME_HEADER: u64 = 4;

pub(super) struct WriteRequest {
    pub data: Vec<u8>,
    pub reply: oneshot::Sender<Result<(), QueueError>>,
}

pub(super) type EmptyRequest = oneshot::Sender<Result<(), QueueError>>;

/// Channels connecting a [`DiskQueue`](super::DiskQueue) handle with its loop.
pub(super) struct Wiring<T> {
    pub read_tx: mpsc::Sender<Envelope<T>>,
    pub write_rx: mpsc::Receiver<WriteRequest>,
    pub empty_rx: mpsc::Receiver<EmptyRequest>,
    pub closed: CancellationToken,
}

/// A message read from disk but not yet handed to a consumer.
struct Prefetched<T> {
    item: T,
    next_file_num: u64,
    next_pos: u64,
}

/// A message sitting in the read channel, waiting for a reader to open it.
struct InFlight {
    ack: oneshot::Receiver<()>,
    next_file_num: u64,
    next_pos: u64,
}

pub(super) struct IoLoop<T> {
    cfg: DiskConfig,
    log: Option<DiskLogFn>,
    cursor: Cursor,
    bytes_on_disk: u64,
    write_file: Option<File>,
    read_file: Option<BufReader<File>>,
    next_read: Option<Prefetched<T>>,
    in_flight: Option<InFlight>,
    writes_since_sync: u64,
    needs_sync: bool,
    depth: Arc<AtomicU64>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> IoLoop<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Restores the cursor from disk and prepares the active segment.
    ///
    /// Fails on anything that would make the queue unusable: an uncreatable
    /// directory, unreadable metadata, an unwritable segment.
    pub async fn open(
        cfg: DiskConfig,
        log: Option<DiskLogFn>,
        depth: Arc<AtomicU64>,
    ) -> Result<Self, QueueError> {
        tokio::fs::create_dir_all(&cfg.dir).await?;
        let cursor = meta::load(&meta::meta_path(&cfg.dir, &cfg.name))
            .await?
            .unwrap_or_default();

        let mut io = Self {
            cfg,
            log,
            cursor,
            bytes_on_disk: 0,
            write_file: None,
            read_file: None,
            next_read: None,
            in_flight: None,
            writes_since_sync: 0,
            needs_sync: false,
            depth,
            _payload: PhantomData,
        };

        io.recover_write_tail().await?;
        let segments = (io.cursor.read_file_num..=io.cursor.write_file_num)
            .map(|num| io.segment(num))
            .collect();
        io.bytes_on_disk = measure_segments(segments).await?;
        io.open_write_file().await?;
        io.sync().await?;
        io.publish_depth();

        io.logf(
            LogLevel::Info,
            format!(
                "opened: depth={} read={}:{} write={}:{} bytes={}",
                io.cursor.depth,
                io.cursor.read_file_num,
                io.cursor.read_pos,
                io.cursor.write_file_num,
                io.cursor.write_pos,
                io.bytes_on_disk
            ),
        );
        Ok(io)
    }

    /// Runs until the queue is closed or its handle is dropped.
    pub async fn run(mut self, wiring: Wiring<T>) {
        let Wiring {
            read_tx,
            mut write_rx,
            mut empty_rx,
            closed,
        } = wiring;

        // `open` just synced, so the first tick is one period away.
        let period = self.cfg.sync_timeout;
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.writes_since_sync >= self.cfg.sync_every {
                self.sync_or_log().await;
            }
            let idle = self.next_read.is_none() && self.in_flight.is_none();
            if idle && self.cursor.has_pending() {
                self.prefetch().await;
            }
            let ready = self.next_read.is_some() && self.in_flight.is_none();
            let waiting = self.in_flight.is_some();

            tokio::select! {
                biased;
                _ = closed.cancelled() => break,
                // Before writes, so a producer racing a consumer sees the freed space.
                acked = wait_ack(&mut self.in_flight), if waiting => {
                    if let Some(done) = self.in_flight.take() {
                        match acked {
                            Ok(()) => self.commit(done.next_file_num, done.next_pos).await,
                            // Dropped unread; read it again from disk.
                            Err(_) => self.read_file = None,
                        }
                    }
                },
                req = write_rx.recv() => match req {
                    Some(req) => {
                        let res = self.write_one(&req.data).await;
                        let _ = req.reply.send(res);
                    }
                    None => break,
                },
                permit = read_tx.reserve(), if ready => match permit {
                    Ok(permit) => {
                        if let Some(next) = self.next_read.take() {
                            let (envelope, ack) = Envelope::with_ack(next.item);
                            permit.send(envelope);
                            self.in_flight = Some(InFlight {
                                ack,
                                next_file_num: next.next_file_num,
                                next_pos: next.next_pos,
                            });
                        }
                    }
                    Err(_) => break,
                },
                req = empty_rx.recv() => {
                    if let Some(reply) = req {
                        let res = self.empty().await;
                        let _ = reply.send(res);
                    }
                },
                _ = ticker.tick() => {
                    if self.needs_sync || self.writes_since_sync > 0 {
                        self.sync_or_log().await;
                    }
                }
            }
        }

        // A reader may have opened the last hand-off while the loop was stopping.
        if let Some(mut done) = self.in_flight.take() {
            if done.ack.try_recv().is_ok() {
                self.commit(done.next_file_num, done.next_pos).await;
            }
        }
        self.sync_or_log().await;
        self.logf(LogLevel::Info, "closed".to_string());
    }

    async fn write_one(&mut self, data: &[u8]) -> Result<(), QueueError> {
        let size = data.len();
        if size < self.cfg.min_msg_size || size > self.cfg.max_msg_size {
            let err = QueueError::InvalidMessageSize {
                size,
                min: self.cfg.min_msg_size,
                max: self.cfg.max_msg_size,
            };
            self.logf(LogLevel::Error, format!("rejected write: {err}"));
            return Err(err);
        }

        let frame = FRAME_HEADER + size as u64;
        let needed = self.bytes_on_disk + frame;
        if self.cfg.max_total_bytes > 0 && needed > self.cfg.max_total_bytes {
            let err = QueueError::DiskFull {
                needed,
                limit: self.cfg.max_total_bytes,
            };
            self.logf(LogLevel::Error, format!("rejected write: {err}"));
            return Err(err);
        }

        if let Err(e) = self.append(data).await {
            self.write_file = None;
            self.logf(
                LogLevel::Error,
                format!("writing to segment {}: {e}", self.cursor.write_file_num),
            );
            return Err(e.into());
        }

        self.cursor.write_pos += frame;
        self.cursor.depth += 1;
        self.bytes_on_disk += frame;
        self.writes_since_sync += 1;
        self.publish_depth();

        if self.cursor.write_pos >= self.cfg.max_bytes_per_file {
            self.rotate().await;
        }
        Ok(())
    }

    async fn append(&mut self, data: &[u8]) -> io::Result<()> {
        if self.write_file.is_none() {
            self.open_write_file().await?;
        }
        let mut buf = Vec::with_capacity(FRAME_HEADER as usize + data.len());
        buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
        buf.extend_from_slice(data);

        let file = self
            .write_file
            .as_mut()
            .ok_or_else(|| io::Error::other("write segment unavailable"))?;
        file.write_all(&buf).await?;
        file.flush().await
    }

    async fn rotate(&mut self) {
        let finished = self.cursor.write_file_num;
        self.cursor.write_file_num += 1;
        self.cursor.write_pos = 0;
        self.sync_or_log().await;
        self.write_file = None;
        self.logf(
            LogLevel::Debug,
            format!("rotated segment {finished} -> {}", self.cursor.write_file_num),
        );
    }

    async fn open_write_file(&mut self) -> io::Result<()> {
        let path = self.segment(self.cursor.write_file_num);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;
        if self.cursor.write_pos > 0 {
            file.seek(SeekFrom::Start(self.cursor.write_pos)).await?;
        }
        self.write_file = Some(file);
        Ok(())
    }

    /// Reads the next frame into `next_read`, skipping corrupt data.
    async fn prefetch(&mut self) {
        if let Err(e) = self.skip_finished_segment().await {
            self.logf(LogLevel::Error, format!("advancing past segment: {e}"));
        }
        if !self.cursor.has_pending() {
            return;
        }

        match self.read_frame().await {
            Ok(bytes) => {
                let end = self.cursor.read_pos + FRAME_HEADER + bytes.len() as u64;
                let (next_file_num, next_pos) = self.next_position(end).await;
                match serde_json::from_slice::<T>(&bytes) {
                    Ok(item) => {
                        self.next_read = Some(Prefetched {
                            item,
                            next_file_num,
                            next_pos,
                        });
                    }
                    Err(e) => {
                        let err = QueueError::Decode(e);
                        self.logf(
                            LogLevel::Error,
                            format!(
                                "skipping message at {}:{}: {err}",
                                self.cursor.read_file_num, self.cursor.read_pos
                            ),
                        );
                        self.commit(next_file_num, next_pos).await;
                    }
                }
            }
            Err(e) => self.handle_read_error(e).await,
        }
    }

    async fn read_frame(&mut self) -> io::Result<Vec<u8>> {
        if self.read_file.is_none() {
            let path = self.segment(self.cursor.read_file_num);
            let mut file = File::open(&path).await?;
            if self.cursor.read_pos > 0 {
                file.seek(SeekFrom::Start(self.cursor.read_pos)).await?;
            }
            self.read_file = Some(BufReader::new(file));
        }
        let reader = self
            .read_file
            .as_mut()
            .ok_or_else(|| io::Error::other("read segment unavailable"))?;

        let size = reader.read_u32().await? as usize;
        if size < self.cfg.min_msg_size || size > self.cfg.max_msg_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid message size {size}"),
            ));
        }
        let mut buf = vec![0u8; size];
        reader.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Computes where the cursor lands once a frame ending at `end` is committed.
    async fn next_position(&mut self, end: u64) -> (u64, u64) {
        let file_num = self.cursor.read_file_num;
        if file_num < self.cursor.write_file_num {
            if let Ok(len) = segment_len(self.segment(file_num)).await {
                if end >= len {
                    self.read_file = None;
                    return (file_num + 1, 0);
                }
            }
        }
        (file_num, end)
    }

    /// Moves the committed cursor and deletes a segment once it is left behind.
    async fn commit(&mut self, next_file_num: u64, next_pos: u64) {
        let left = self.cursor.read_file_num;
        self.cursor.read_file_num = next_file_num;
        self.cursor.read_pos = next_pos;
        self.cursor.depth = self.cursor.depth.saturating_sub(1);

        if left != next_file_num {
            self.remove_segment(left).await;
            self.needs_sync = true;
        }
        self.check_tail();
        if !self.cursor.has_pending() && self.cursor.write_pos > 0 {
            self.retire_drained_segment().await;
        }
        self.publish_depth();
    }

    /// Read caught up with write: start both cursors on a fresh segment and
    /// delete the fully consumed one.
    async fn retire_drained_segment(&mut self) {
        let drained = self.cursor.write_file_num;
        self.write_file = None;
        self.read_file = None;
        self.cursor.write_file_num += 1;
        self.cursor.write_pos = 0;
        self.cursor.read_file_num = self.cursor.write_file_num;
        self.cursor.read_pos = 0;
        self.remove_segment(drained).await;
        self.needs_sync = true;
        self.logf(
            LogLevel::Debug,
            format!(
                "drained segment {drained}, continuing on {}",
                self.cursor.write_file_num
            ),
        );
    }

    /// A finished segment whose end was reached (e.g. after a restart) is dropped.
    async fn skip_finished_segment(&mut self) -> io::Result<()> {
        while self.cursor.read_file_num < self.cursor.write_file_num {
            let len = segment_len(self.segment(self.cursor.read_file_num)).await?;
            if self.cursor.read_pos < len {
                break;
            }
            let left = self.cursor.read_file_num;
            self.read_file = None;
            self.cursor.read_file_num += 1;
            self.cursor.read_pos = 0;
            self.remove_segment(left).await;
            self.needs_sync = true;
        }
        Ok(())
    }

    async fn handle_read_error(&mut self, err: io::Error) {
        self.read_file = None;
        let bad_num = self.cursor.read_file_num;
        let path = self.segment(bad_num);
        let size = segment_len(path.clone()).await.unwrap_or(0);
        let mut bad = path.clone().into_os_string();
        bad.push(".bad");

        self.logf(
            LogLevel::Error,
            format!(
                "reading segment {bad_num} at {}: {err}; moving to {}",
                self.cursor.read_pos,
                PathBuf::from(&bad).display()
            ),
        );
        if let Err(e) = tokio::fs::rename(&path, &bad).await {
            self.logf(
                LogLevel::Error,
                format!("renaming corrupt segment {bad_num}: {e}"),
            );
        }
        self.bytes_on_disk = self.bytes_on_disk.saturating_sub(size);

        if bad_num == self.cursor.write_file_num {
            self.write_file = None;
            self.cursor.write_file_num += 1;
            self.cursor.write_pos = 0;
        }
        self.cursor.read_file_num = bad_num + 1;
        self.cursor.read_pos = 0;
        self.needs_sync = true;
        self.check_tail();
        self.publish_depth();
    }

    /// Deletes every segment and restarts both cursors on a fresh file.
    async fn empty(&mut self) -> Result<(), QueueError> {
        self.read_file = None;
        self.write_file = None;
        self.next_read = None;
        self.in_flight = None;
        for num in self.cursor.read_file_num..=self.cursor.write_file_num {
            self.remove_segment(num).await;
        }
        let fresh = self.cursor.write_file_num + 1;
        self.cursor = Cursor {
            depth: 0,
            read_file_num: fresh,
            read_pos: 0,
            write_file_num: fresh,
            write_pos: 0,
        };
        self.bytes_on_disk = 0;
        self.publish_depth();
        self.open_write_file().await?;
        self.sync().await?;
        self.logf(LogLevel::Info, "emptied".to_string());
        Ok(())
    }

    /// When read caught up with write the depth must be zero.
    fn check_tail(&mut self) {
        if !self.cursor.has_pending() && self.cursor.depth != 0 {
            self.logf(
                LogLevel::Warn,
                format!(
                    "depth {} with no pending data, resetting to 0",
                    self.cursor.depth
                ),
            );
            self.cursor.depth = 0;
            self.needs_sync = true;
        }
    }

    /// A segment larger than the persisted write position means writes after
    /// the last sync; they are left readable and new writes start a new segment.
    async fn recover_write_tail(&mut self) -> io::Result<()> {
        let len = match segment_len(self.segment(self.cursor.write_file_num)).await {
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if len > self.cursor.write_pos {
            self.logf(
                LogLevel::Warn,
                format!(
                    "segment {} is {len} bytes, metadata says {}; starting a new segment",
                    self.cursor.write_file_num, self.cursor.write_pos
                ),
            );
            self.cursor.write_file_num += 1;
            self.cursor.write_pos = 0;
        }
        Ok(())
    }

    async fn remove_segment(&mut self, num: u64) {
        let path = self.segment(num);
        let size = segment_len(path.clone()).await.unwrap_or(0);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.bytes_on_disk = self.bytes_on_disk.saturating_sub(size);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => self.logf(LogLevel::Error, format!("removing segment {num}: {e}")),
        }
    }

    async fn sync(&mut self) -> io::Result<()> {
        if let Some(file) = self.write_file.as_mut() {
            file.sync_all().await?;
        }
        meta::store(&meta::meta_path(&self.cfg.dir, &self.cfg.name), &self.cursor).await?;
        self.writes_since_sync = 0;
        self.needs_sync = false;
        Ok(())
    }

    async fn sync_or_log(&mut self) {
        if let Err(e) = self.sync().await {
            self.logf(LogLevel::Error, format!("sync failed: {e}"));
        }
    }

    fn segment(&self, num: u64) -> PathBuf {
        meta::segment_path(&self.cfg.dir, &self.cfg.name, num)
    }

    fn publish_depth(&self) {
        self.depth.store(self.cursor.depth, Ordering::Release);
    }

    fn logf(&self, level: LogLevel, msg: String) {
        let queue = self.cfg.name.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(queue, "{msg}"),
            LogLevel::Info => tracing::info!(queue, "{msg}"),
            LogLevel::Warn => tracing::warn!(queue, "{msg}"),
            LogLevel::Error | LogLevel::Fatal => tracing::error!(queue, "{msg}"),
        }
        if let Some(log) = &self.log {
            log(level, &msg);
        }
    }
}

// Free functions so no `&IoLoop<T>` is held across an await; the loop future
// then stays `Send` for payloads that are `Send` but not `Sync`.

async fn segment_len(path: PathBuf) -> io::Result<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}

async fn measure_segments(paths: Vec<PathBuf>) -> io::Result<u64> {
    let mut total = 0;
    for path in paths {
        match segment_len(path).await {
            Ok(len) => total += len,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Resolves when the in-flight message is opened or dropped.
async fn wait_ack(in_flight: &mut Option<InFlight>) -> Result<(), oneshot::error::RecvError> {
    match in_flight {
        Some(pending) => (&mut pending.ack).await,
        None => std::future::pending().await,
    }
}
