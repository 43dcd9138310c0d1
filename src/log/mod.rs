//! Append-only log sink and source.
//!
//! One *logical* log may span several rotated physical files. The sink
//! hides rotation and write buffering behind a monotonically increasing
//! **logical offset**: the address recorded in index entries, stable
//! across rotation. The source re-assembles the logical byte stream for
//! positional reads.
//!
//! # File naming
//!
//! | Mode | Physical files |
//! |------|----------------|
//! | rotation disabled | `<prefix>.dat` |
//! | rotation enabled  | `<prefix>.dat.0`, then `<prefix>.dat.<index>` per [`LogSink::rotate`] |
//!
//! # Sharing model
//!
//! [`LogSink`] is a cheaply cloneable handle over one shared stream;
//! clones are reference counts. When the last handle drops, buffered
//! bytes are flushed and synced; failures at that point are logged, not
//! panicked on.
//!
//! # Durability
//!
//! `append` may buffer. Bytes are durable only after a successful
//! [`LogSink::sync`], which flushes the write buffer and then issues a
//! device-level sync.

#[cfg(test)]
mod tests;

use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::env::{Appender, BufferedAppender, CountingAppender, FileAppender, IoStats, MmapReader, ReaderAt};

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by log operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LogError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation on a sink that has been closed.
    #[error("log sink is disconnected")]
    Disconnected,

    /// `rotate` on a sink opened without rotation.
    #[error("rotation was not enabled at open time")]
    RotationDisabled,
}

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// Open-time configuration of a [`LogSink`].
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Name physical files `<prefix>.dat.<index>` and permit
    /// [`LogSink::rotate`].
    pub rotation: bool,

    /// Write-buffer capacity in bytes; `0` writes through.
    pub max_buf: usize,

    /// Count bytes/ops/syncs via a shared [`IoStats`].
    pub io_stats: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            rotation: false,
            max_buf: 64 << 10,
            io_stats: false,
        }
    }
}

/// Physical path for `prefix` at an optional rotation index.
fn data_path(prefix: &Path, rotation: Option<u32>) -> PathBuf {
    match rotation {
        None => PathBuf::from(format!("{}.dat", prefix.display())),
        Some(index) => PathBuf::from(format!("{}.dat.{index}", prefix.display())),
    }
}

// ------------------------------------------------------------------------------------------------
// LogSink
// ------------------------------------------------------------------------------------------------

struct SinkInner {
    /// Current destination; `None` once the sink is closed.
    dest: Option<Box<dyn Appender>>,

    /// Path prefix used to open rotated files.
    prefix: PathBuf,

    /// Whether rotation was enabled at open time.
    rotation: bool,

    /// Write-buffer capacity for newly rotated files.
    max_buf: usize,

    /// Shared statistics, also attached to rotated files.
    stats: Option<Arc<IoStats>>,

    /// Logical write offset — monotone across rotation.
    logical: u64,

    /// Offset within the current physical file.
    physical: u64,
}

impl SinkInner {
    /// Build the `Buffered(Counting(File))` appender chain for `path`.
    fn open_dest(
        path: &Path,
        max_buf: usize,
        stats: Option<&Arc<IoStats>>,
    ) -> Result<Box<dyn Appender>, LogError> {
        let mut dest: Box<dyn Appender> = Box::new(FileAppender::create(path)?);
        if let Some(stats) = stats {
            dest = Box::new(CountingAppender::new(dest, Arc::clone(stats)));
        }
        if max_buf > 0 {
            dest = Box::new(BufferedAppender::new(dest, max_buf));
        }
        Ok(dest)
    }
}

impl Drop for SinkInner {
    fn drop(&mut self) {
        if let Some(mut dest) = self.dest.take()
            && let Err(e) = dest.sync()
        {
            error!(prefix = %self.prefix.display(), error = %e, "log sink sync failed on drop");
        }
    }
}

/// A reference-counted handle over one append-only logical log.
///
/// See the [module-level documentation](self) for naming, sharing, and
/// durability semantics.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl LogSink {
    /// Open (creating if missing) the first physical file of the log.
    ///
    /// # Errors
    ///
    /// [`LogError::Io`] if the file cannot be created.
    pub fn open(options: &LogOptions, prefix: impl AsRef<Path>) -> Result<Self, LogError> {
        let prefix = prefix.as_ref().to_path_buf();
        let stats = options.io_stats.then(|| Arc::new(IoStats::default()));

        let first = data_path(&prefix, options.rotation.then_some(0));
        let dest = SinkInner::open_dest(&first, options.max_buf, stats.as_ref())?;

        info!(
            path = %first.display(),
            rotation = options.rotation,
            max_buf = options.max_buf,
            "log sink opened"
        );

        Ok(Self {
            inner: Arc::new(Mutex::new(SinkInner {
                dest: Some(dest),
                prefix,
                rotation: options.rotation,
                max_buf: options.max_buf,
                stats,
                logical: 0,
                physical: 0,
            })),
        })
    }

    /// Wrap a caller-supplied appender directly (rotation unavailable).
    ///
    /// Intended for composing custom storage and for fault injection in
    /// tests.
    pub fn from_appender(dest: Box<dyn Appender>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkInner {
                dest: Some(dest),
                prefix: PathBuf::new(),
                rotation: false,
                max_buf: 0,
                stats: None,
                logical: 0,
                physical: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkInner> {
        // A poisoned sink mutex means a writer panicked mid-append; the
        // byte counters are still consistent, so continue.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Append `data`, advancing the logical offset by `data.len()`.
    ///
    /// The bytes may be buffered; they are durable only after
    /// [`sync`](Self::sync).
    pub fn append(&self, data: &[u8]) -> Result<(), LogError> {
        let mut inner = self.lock();
        let dest = inner.dest.as_mut().ok_or(LogError::Disconnected)?;
        dest.append(data)?;
        inner.logical += data.len() as u64;
        inner.physical += data.len() as u64;
        Ok(())
    }

    /// Flush buffered bytes and force them to the storage device.
    pub fn sync(&self) -> Result<(), LogError> {
        let mut inner = self.lock();
        let dest = inner.dest.as_mut().ok_or(LogError::Disconnected)?;
        dest.sync()?;
        Ok(())
    }

    /// Close the current physical file and redirect subsequent appends
    /// to `<prefix>.dat.<index>`. The logical offset is unaffected.
    ///
    /// # Errors
    ///
    /// [`LogError::RotationDisabled`] unless rotation was enabled at
    /// open time; [`LogError::Disconnected`] after close.
    pub fn rotate(&self, index: u32, sync: bool) -> Result<(), LogError> {
        let mut inner = self.lock();
        if !inner.rotation {
            return Err(LogError::RotationDisabled);
        }
        let mut dest = inner.dest.take().ok_or(LogError::Disconnected)?;
        if sync {
            dest.sync()?;
        } else {
            dest.flush()?;
        }
        drop(dest);

        let next = data_path(&inner.prefix, Some(index));
        inner.dest = Some(SinkInner::open_dest(
            &next,
            inner.max_buf,
            inner.stats.as_ref(),
        )?);
        inner.physical = 0;

        info!(path = %next.display(), logical = inner.logical, "log sink rotated");
        Ok(())
    }

    /// Transition to the disconnected state. Idempotent; subsequent
    /// `append`/`sync` fail with [`LogError::Disconnected`].
    pub fn close(&self, sync: bool) -> Result<(), LogError> {
        let mut inner = self.lock();
        let Some(mut dest) = inner.dest.take() else {
            return Ok(());
        };
        let result = if sync { dest.sync() } else { dest.flush() };
        debug!(prefix = %inner.prefix.display(), logical = inner.logical, "log sink closed");
        result.map_err(LogError::Io)
    }

    /// The stable logical write offset used by index entries.
    pub fn ltell(&self) -> u64 {
        self.lock().logical
    }

    /// The offset within the current physical file.
    pub fn ptell(&self) -> u64 {
        self.lock().physical
    }

    /// Shared i/o statistics, when counting was enabled at open.
    pub fn io_stats(&self) -> Option<Arc<IoStats>> {
        self.lock().stats.clone()
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("LogSink")
            .field("prefix", &inner.prefix)
            .field("rotation", &inner.rotation)
            .field("logical", &inner.logical)
            .field("physical", &inner.physical)
            .field("connected", &inner.dest.is_some())
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// LogSource
// ------------------------------------------------------------------------------------------------

/// One physical segment of the logical log.
struct LogPart {
    /// Logical offset of this part's first byte.
    start: u64,
    /// Physical length in bytes.
    len: u64,
    reader: MmapReader,
}

/// Read-only view over the logical concatenation of a log's physical
/// files.
pub struct LogSource {
    parts: Vec<LogPart>,
    total: u64,
}

impl LogSource {
    /// Open the log written under `prefix`.
    ///
    /// `num_rotations: None` opens the single unrotated `<prefix>.dat`;
    /// `Some(n)` enumerates `<prefix>.dat.0 ..= <prefix>.dat.<n>`,
    /// skipping indices that were never written.
    pub fn open(prefix: impl AsRef<Path>, num_rotations: Option<u32>) -> Result<Self, LogError> {
        let prefix = prefix.as_ref();
        let mut parts = Vec::new();
        let mut total: u64 = 0;

        let mut push_part = |path: PathBuf| -> Result<(), LogError> {
            let reader = MmapReader::open(&path)?;
            let len = reader.len();
            debug!(path = %path.display(), len, start = total, "log part mapped");
            parts.push(LogPart {
                start: total,
                len,
                reader,
            });
            total += len;
            Ok(())
        };

        match num_rotations {
            None => push_part(data_path(prefix, None))?,
            Some(max_index) => {
                for index in 0..=max_index {
                    let path = data_path(prefix, Some(index));
                    if path.exists() {
                        push_part(path)?;
                    }
                }
                if parts.is_empty() {
                    return Err(LogError::Io(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no rotated log files under {}", prefix.display()),
                    )));
                }
            }
        }

        Ok(Self { parts, total })
    }

    /// Fill `buf` from the logical range `[offset, offset + buf.len())`,
    /// crossing physical-file boundaries as needed.
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<(), LogError> {
        let end = offset.checked_add(buf.len() as u64);
        if end.is_none_or(|end| end > self.total) {
            return Err(LogError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past logical end of log",
            )));
        }

        // Locate the part holding `offset`, then copy forward.
        let mut part_idx = match self
            .parts
            .binary_search_by(|part| part.start.cmp(&offset))
        {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let mut logical = offset;
        let mut filled = 0usize;

        while filled < buf.len() {
            let part = &self.parts[part_idx];
            let within = logical - part.start;
            if within >= part.len {
                // Empty (or exhausted) part; move to the next one.
                part_idx += 1;
                continue;
            }
            let take = ((part.len - within) as usize).min(buf.len() - filled);
            part.reader
                .read_exact_at(&mut buf[filled..filled + take], within)?;
            filled += take;
            logical += take as u64;
            if within + take as u64 == part.len {
                part_idx += 1;
            }
        }
        Ok(())
    }

    /// Total logical size — the sum over all physical files.
    pub fn total_size(&self) -> u64 {
        self.total
    }

    /// Number of physical files backing this source.
    pub fn num_parts(&self) -> usize {
        self.parts.len()
    }
}

impl std::fmt::Debug for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSource")
            .field("num_parts", &self.parts.len())
            .field("total", &self.total)
            .finish()
    }
}
