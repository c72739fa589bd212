//! Segment naming and the persisted read/write cursor.
//!
//! The metadata file is three text lines:
//! ```text
//! <depth>
//! <read_file_num>,<read_pos>
//! <write_file_num>,<write_pos>
//! ```
//! It is always replaced atomically (temp file + rename).

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

/// Read/write position of a disk queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct Cursor {
    pub depth: u64,
    pub read_file_num: u64,
    pub read_pos: u64,
    pub write_file_num: u64,
    pub write_pos: u64,
}

impl Cursor {
    /// True when unread bytes exist between the read and write positions.
    pub fn has_pending(&self) -> bool {
        self.read_file_num < self.write_file_num || self.read_pos < self.write_pos
    }

    fn render(&self) -> String {
        format!(
            "{}\n{},{}\n{},{}\n",
            self.depth, self.read_file_num, self.read_pos, self.write_file_num, self.write_pos
        )
    }

    fn parse(raw: &str) -> Option<Self> {
        let mut lines = raw.lines();
        let depth = lines.next()?.trim().parse().ok()?;
        let (read_file_num, read_pos) = pair(lines.next()?)?;
        let (write_file_num, write_pos) = pair(lines.next()?)?;
        Some(Self {
            depth,
            read_file_num,
            read_pos,
            write_file_num,
            write_pos,
        })
    }
}

fn pair(line: &str) -> Option<(u64, u64)> {
    let (a, b) = line.trim().split_once(',')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

pub(super) fn segment_path(dir: &Path, name: &str, num: u64) -> PathBuf {
    dir.join(format!("{name}.diskqueue.{num:06}.dat"))
}

pub(super) fn meta_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.diskqueue.meta.dat"))
}

/// Loads the cursor; `Ok(None)` when the queue has never been persisted.
pub(super) async fn load(path: &Path) -> io::Result<Option<Cursor>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Cursor::parse(&raw).map(Some).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("corrupt metadata in {}", path.display()),
            )
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

pub(super) async fn store(path: &Path, cursor: &Cursor) -> io::Result<()> {
    let tmp = path.with_extension("dat.tmp");
    let mut f = tokio::fs::File::create(&tmp).await?;
    f.write_all(cursor.render().as_bytes()).await?;
    f.sync_all().await?;
    drop(f);
    tokio::fs::rename(&tmp, path).await
}
