//! File capability traits and the background worker pool.
//!
//! The storage layers below the engine are expressed as two narrow
//! capability traits instead of a class hierarchy:
//!
//! - [`Appender`] — sequential append with explicit flush/sync.
//! - [`ReaderAt`] — positional reads from an immutable file.
//!
//! Concrete files ([`FileAppender`], [`MmapReader`]) are composed with
//! small decorators ([`BufferedAppender`], [`CountingAppender`]) rather
//! than subclassed. No decorator chain is ever deeper than two layers.
//!
//! The [`ThreadPool`] executes background compaction closures; it is
//! shared between writers via `Arc` and joined on drop.

#[cfg(test)]
mod tests;

mod pool;

pub use pool::{ThreadPool, default_pool};

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use memmap2::Mmap;
use tracing::debug;

// ------------------------------------------------------------------------------------------------
// Capability traits
// ------------------------------------------------------------------------------------------------

/// Sequential append-only output.
///
/// `append` may buffer; data is guaranteed on the device only after a
/// successful [`sync`](Appender::sync). `flush` pushes buffered bytes to
/// the layer below without forcing a device sync.
pub trait Appender: Send {
    /// Append `data` at the current end of the stream.
    fn append(&mut self, data: &[u8]) -> io::Result<()>;

    /// Push any buffered bytes down to the underlying file.
    fn flush(&mut self) -> io::Result<()>;

    /// Flush, then force written bytes to the storage device.
    fn sync(&mut self) -> io::Result<()>;
}

/// Positional reads from an immutable byte source.
pub trait ReaderAt: Send + Sync {
    /// Fill `buf` with the bytes at `[offset, offset + buf.len())`.
    ///
    /// Fails with `UnexpectedEof` if the range extends past the end.
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;

    /// Total readable length in bytes.
    fn len(&self) -> u64;

    /// Returns `true` if the source holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ------------------------------------------------------------------------------------------------
// FileAppender
// ------------------------------------------------------------------------------------------------

/// An [`Appender`] over one physical file, created (or truncated) on
/// open.
#[derive(Debug)]
pub struct FileAppender {
    file: File,
    path: PathBuf,
}

impl FileAppender {
    /// Create `path` (truncating any previous content) for appending.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        debug!(path = %path.display(), "appender created");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Appender for FileAppender {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }
}

// ------------------------------------------------------------------------------------------------
// BufferedAppender — write buffering decorator
// ------------------------------------------------------------------------------------------------

/// Batches small appends into `capacity`-sized writes.
///
/// Appends larger than the remaining buffer space flush the buffer
/// first; appends larger than the whole buffer bypass it.
pub struct BufferedAppender {
    inner: Box<dyn Appender>,
    buf: Vec<u8>,
    capacity: usize,
}

impl BufferedAppender {
    /// Wrap `inner` with a `capacity`-byte write buffer.
    pub fn new(inner: Box<dyn Appender>, capacity: usize) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }
}

impl Appender for BufferedAppender {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        if self.buf.len() + data.len() > self.capacity {
            self.flush()?;
        }
        if data.len() >= self.capacity {
            return self.inner.append(data);
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.inner.append(&self.buf)?;
            self.buf.clear();
        }
        self.inner.flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.inner.sync()
    }
}

// ------------------------------------------------------------------------------------------------
// CountingAppender — i/o statistics decorator
// ------------------------------------------------------------------------------------------------

/// Shared append-path statistics, updated atomically.
#[derive(Debug, Default)]
pub struct IoStats {
    bytes_written: AtomicU64,
    write_ops: AtomicU64,
    syncs: AtomicU64,
}

impl IoStats {
    /// Total bytes pushed through the appender.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Number of `append` calls.
    pub fn write_ops(&self) -> u64 {
        self.write_ops.load(Ordering::Relaxed)
    }

    /// Number of device syncs.
    pub fn syncs(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }
}

/// Counts bytes, operations, and syncs flowing into `inner`.
pub struct CountingAppender {
    inner: Box<dyn Appender>,
    stats: Arc<IoStats>,
}

impl CountingAppender {
    /// Wrap `inner`, recording activity into `stats`.
    pub fn new(inner: Box<dyn Appender>, stats: Arc<IoStats>) -> Self {
        Self { inner, stats }
    }
}

impl Appender for CountingAppender {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.append(data)?;
        self.stats
            .bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.stats.write_ops.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.inner.sync()?;
        self.stats.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// MmapReader
// ------------------------------------------------------------------------------------------------

/// A [`ReaderAt`] backed by a shared memory map of one file.
///
/// Empty files are handled without mapping (mapping a zero-length file
/// is rejected by the OS).
#[derive(Debug)]
pub struct MmapReader {
    map: Option<Mmap>,
}

impl MmapReader {
    /// Map `path` read-only.
    ///
    /// Uses `unsafe { Mmap::map(...) }` but is memory-safe because the
    /// mapped log files are immutable once a reader opens them.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { map })
    }
}

impl ReaderAt for MmapReader {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let data: &[u8] = self.map.as_deref().unwrap_or(&[]);
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "offset past end"))?;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= data.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "read past end"))?;
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.map.as_deref().map_or(0, |m| m.len() as u64)
    }
}
