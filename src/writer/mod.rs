//! The double-buffered write pipeline.
//!
//! [`DirWriter`] accepts key/value records from any number of producer
//! threads, batches them in an active in-memory buffer, and rotates
//! full buffers to background compaction: each rotated buffer is
//! serialized into one data block plus one filter stripe and appended
//! to the shared [`LogSink`].
//!
//! # Concurrency model
//!
//! One mutex + one condvar coordinate everything:
//!
//! - **Rotation** assigns each immutable buffer a monotonically
//!   increasing *ticket* and blocks (back-pressure) while no free
//!   buffer exists.
//! - **Compaction tasks** serialize and filter outside the lock, then
//!   park at the *commit barrier* until `last_committed + 1` equals
//!   their ticket. Blocks therefore reach the sink in rotation order no
//!   matter which worker finishes first, and at most one task is ever
//!   between the barrier and its commit.
//! - **Background errors** latch into a sticky status that every later
//!   foreground call surfaces; the writer never retries.
//!
//! Compaction runs on the configured pool, on the process default pool
//! (`allow_env_threads`), or inline on the calling thread when neither
//! is available.
//!
//! # Shutdown
//!
//! [`DirWriter::finish`] is the terminal operation: it drains all
//! compactions, appends the filter stream, the index stream (with its
//! sentinel entry), and the fixed-size footer, then syncs and closes
//! the sink. The outcome is latched and replayed by repeat calls.
//! There is no mid-compaction cancellation.

#[cfg(test)]
mod tests;

use std::{
    io,
    path::Path,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tracing::{debug, error, info, trace};

use crate::block::{BlockBuilder, BlockError};
use crate::coding::{BlockHandle, FOOTER_LEN, put_fixed64};
use crate::env::default_pool;
use crate::filter::{FilterBlock, FilterBuilder};
use crate::log::{LogError, LogOptions, LogSink};
use crate::options::{DirOptions, OptionsError};

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by the write pipeline.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DirError {
    /// Rejected configuration at open.
    #[error("invalid options: {0}")]
    Options(#[from] OptionsError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error from the log sink.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Error while serializing a block.
    #[error("block error: {0}")]
    Block(#[from] BlockError),

    /// Operation on a writer after `finish`.
    #[error("writer is finished")]
    Finished,

    /// A previously failed background compaction (or `finish` step),
    /// replayed to later callers.
    #[error("{0}")]
    Background(Arc<DirError>),
}

// ------------------------------------------------------------------------------------------------
// MemBuffer — arena of length-prefixed records plus a stable index
// ------------------------------------------------------------------------------------------------

/// In-memory record accumulator.
///
/// Records live back-to-back in one arena as
/// `[klen: u32][key][vlen: u32][value]`; `offsets` indexes entry starts
/// in insertion order. Clearing retains capacity so buffers recycle
/// their allocations across compactions.
pub(crate) struct MemBuffer {
    arena: Vec<u8>,
    offsets: Vec<u32>,
}

fn read_len(arena: &[u8], pos: usize) -> usize {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&arena[pos..pos + 4]);
    u32::from_le_bytes(bytes) as usize
}

impl MemBuffer {
    fn with_capacity(bytes: usize) -> Self {
        Self {
            arena: Vec::with_capacity(bytes),
            offsets: Vec::new(),
        }
    }

    fn add(&mut self, key: &[u8], value: &[u8]) {
        self.offsets.push(self.arena.len() as u32);
        self.arena.extend_from_slice(&(key.len() as u32).to_le_bytes());
        self.arena.extend_from_slice(key);
        self.arena
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.arena.extend_from_slice(value);
    }

    fn entry_at(&self, index: usize) -> (&[u8], &[u8]) {
        let mut pos = self.offsets[index] as usize;
        let klen = read_len(&self.arena, pos);
        pos += 4;
        let key = &self.arena[pos..pos + klen];
        pos += klen;
        let vlen = read_len(&self.arena, pos);
        pos += 4;
        (key, &self.arena[pos..pos + vlen])
    }

    fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        (0..self.num_entries()).map(|i| self.entry_at(i))
    }

    fn num_entries(&self) -> usize {
        self.offsets.len()
    }

    fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn mem_usage(&self) -> usize {
        self.arena.len() + self.offsets.len() * 4
    }

    fn clear(&mut self) {
        self.arena.clear();
        self.offsets.clear();
    }
}

// ------------------------------------------------------------------------------------------------
// Writer state
// ------------------------------------------------------------------------------------------------

struct WriterState {
    /// Buffer currently accepting records.
    active: MemBuffer,

    /// Buffers neither active nor under compaction.
    free: Vec<MemBuffer>,

    /// Compactions scheduled but not yet committed.
    num_bg: usize,

    /// Ticket of the most recently rotated buffer.
    next_ticket: u32,

    /// Highest ticket whose append has finished.
    last_committed: u32,

    /// `(filter_end, data_end)` LE u64 pairs, one per committed block.
    indexes: Vec<u8>,

    /// Concatenated filter stripes of committed blocks.
    filter_stream: Vec<u8>,

    /// Sticky first background failure.
    bg_status: Option<Arc<DirError>>,

    /// Set once `finish` has started; blocks further mutation.
    finished: bool,

    /// Latched `finish` outcome, replayed to repeat callers.
    finish_outcome: Option<Option<Arc<DirError>>>,
}

struct WriterShared {
    options: DirOptions,
    buf_threshold: usize,
    sink: LogSink,
    state: Mutex<WriterState>,
    cv: Condvar,
}

/// Multi-producer handle to one directory's write pipeline.
///
/// Cloning is cheap; all clones feed the same buffers and sink.
#[derive(Clone)]
pub struct DirWriter {
    shared: Arc<WriterShared>,
}

impl DirWriter {
    /// Open a writer over a fresh log at `prefix`.
    ///
    /// Validates `options`, creates the first physical file, and sizes
    /// `num_bufs` buffers out of the memtable budget.
    pub fn open(options: DirOptions, prefix: impl AsRef<Path>) -> Result<Self, DirError> {
        options.validate()?;

        let sink = LogSink::open(
            &LogOptions {
                rotation: options.rotation,
                max_buf: options.sink_buffer,
                io_stats: options.sink_io_stats,
            },
            prefix.as_ref(),
        )?;
        debug!(prefix = %prefix.as_ref().display(), "sink attached");
        Self::with_sink(options, sink)
    }

    /// Build a writer over an already-open sink, e.g. one composed via
    /// [`LogSink::from_appender`]. [`rotate`](Self::rotate) requires a
    /// sink opened with rotation.
    pub fn with_sink(options: DirOptions, sink: LogSink) -> Result<Self, DirError> {
        options.validate()?;

        let per_buf = options.total_memtable_budget / options.num_bufs;
        let active = MemBuffer::with_capacity(per_buf);
        let free = (1..options.num_bufs)
            .map(|_| MemBuffer::with_capacity(per_buf))
            .collect();

        info!(
            num_bufs = options.num_bufs,
            buf_threshold = options.buf_threshold(),
            filter = ?options.filter,
            "directory writer opened"
        );

        Ok(Self {
            shared: Arc::new(WriterShared {
                buf_threshold: options.buf_threshold(),
                sink,
                state: Mutex::new(WriterState {
                    active,
                    free,
                    num_bg: 0,
                    next_ticket: 0,
                    last_committed: 0,
                    indexes: Vec::new(),
                    filter_stream: Vec::new(),
                    bg_status: None,
                    finished: false,
                    finish_outcome: None,
                }),
                cv: Condvar::new(),
                options,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        // A poisoned lock means a producer panicked between field
        // updates that are individually consistent; keep going.
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn cv_wait<'a>(&self, guard: MutexGuard<'a, WriterState>) -> MutexGuard<'a, WriterState> {
        self.shared
            .cv
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(state: &WriterState) -> Result<(), DirError> {
        if state.finished {
            return Err(DirError::Finished);
        }
        if let Some(status) = &state.bg_status {
            return Err(DirError::Background(Arc::clone(status)));
        }
        Ok(())
    }

    /// Append one record.
    ///
    /// Rotates the active buffer first when the record would push it
    /// past the rotation threshold, which may block while every buffer
    /// is under compaction (back-pressure).
    ///
    /// # Errors
    ///
    /// The sticky background status of any previously failed
    /// compaction; [`DirError::Finished`] after `finish`.
    pub fn add(&self, key: &[u8], value: &[u8]) -> Result<(), DirError> {
        let mut state = self.lock();
        Self::check_writable(&state)?;

        let entry_size = key.len() + value.len() + 8;
        if !state.active.is_empty() && state.active.mem_usage() + entry_size > self.shared.buf_threshold
        {
            state = self.rotate_buffer(state)?;
        }
        state.active.add(key, value);
        Ok(())
    }

    /// Rotate a non-empty active buffer into compaction without waiting
    /// for it to finish.
    pub fn flush(&self) -> Result<(), DirError> {
        let mut state = self.lock();
        Self::check_writable(&state)?;
        if !state.active.is_empty() {
            self.rotate_buffer(state)?;
        }
        Ok(())
    }

    /// Flush at an epoch boundary.
    ///
    /// Epoch boundaries carry no extra semantics here: this forces a
    /// compaction exactly like [`flush`](Self::flush). Callers that tie
    /// epochs to physical files can follow up with
    /// [`rotate`](Self::rotate).
    pub fn epoch_flush(&self) -> Result<(), DirError> {
        self.flush()
    }

    /// Flush, drain all outstanding compactions, then force written
    /// bytes to the device. The only durability point in the pipeline.
    pub fn sync(&self) -> Result<(), DirError> {
        let mut state = self.lock();
        Self::check_writable(&state)?;
        if !state.active.is_empty() {
            state = self.rotate_buffer(state)?;
        }
        while state.num_bg > 0 {
            state = self.cv_wait(state);
        }
        if let Some(status) = &state.bg_status {
            return Err(DirError::Background(Arc::clone(status)));
        }
        self.shared.sink.sync()?;
        Ok(())
    }

    /// Block until no compaction is outstanding and report the sticky
    /// background status.
    pub fn wait(&self) -> Result<(), DirError> {
        let mut state = self.lock();
        while state.num_bg > 0 {
            state = self.cv_wait(state);
        }
        match &state.bg_status {
            Some(status) => Err(DirError::Background(Arc::clone(status))),
            None => Ok(()),
        }
    }

    /// Drain the pipeline, then redirect the sink to physical file
    /// `<prefix>.dat.<index>`. Requires [`DirOptions::rotation`].
    ///
    /// The logical offsets already handed to the index are unaffected.
    pub fn rotate(&self, index: u32) -> Result<(), DirError> {
        let mut state = self.lock();
        Self::check_writable(&state)?;
        if !state.active.is_empty() {
            state = self.rotate_buffer(state)?;
        }
        while state.num_bg > 0 {
            state = self.cv_wait(state);
        }
        if let Some(status) = &state.bg_status {
            return Err(DirError::Background(Arc::clone(status)));
        }
        // Holding the state lock keeps new compactions from appending
        // across the file switch.
        self.shared.sink.rotate(index, false)?;
        drop(state);
        Ok(())
    }

    /// Terminal operation: drain, emit filter stream + index stream +
    /// footer, sync, and close the sink.
    ///
    /// Returns the first error encountered but attempts every step.
    /// Idempotent — repeat calls replay the first outcome.
    pub fn finish(&self) -> Result<(), DirError> {
        let mut state = self.lock();

        if state.finished {
            // Another caller got here first; wait for its outcome.
            while state.finish_outcome.is_none() {
                state = self.cv_wait(state);
            }
            return match &state.finish_outcome {
                Some(Some(status)) => Err(DirError::Background(Arc::clone(status))),
                _ => Ok(()),
            };
        }

        if !state.active.is_empty() && state.bg_status.is_none() {
            state = match self.rotate_buffer(state) {
                Ok(state) => state,
                Err(_) => self.lock(), // sticky status handled below
            };
        }
        state.finished = true;
        while state.num_bg > 0 {
            state = self.cv_wait(state);
        }

        let mut first_error: Option<Arc<DirError>> = state.bg_status.clone();
        let record = |result: Result<(), DirError>, first: &mut Option<Arc<DirError>>| {
            if let Err(e) = result {
                error!(error = %e, "finish step failed");
                if first.is_none() {
                    *first = Some(Arc::new(e));
                }
            }
        };

        // Sentinel entry: n blocks yield n + 1 index entries.
        let filter_len = state.filter_stream.len() as u64;
        let data_end = self.shared.sink.ltell();
        put_fixed64(&mut state.indexes, filter_len);
        put_fixed64(&mut state.indexes, data_end);

        let sink = &self.shared.sink;
        let filter_handle = BlockHandle::new(sink.ltell(), state.filter_stream.len() as u64);
        record(
            sink.append(&state.filter_stream).map_err(DirError::from),
            &mut first_error,
        );
        let index_handle = BlockHandle::new(sink.ltell(), state.indexes.len() as u64);
        record(
            sink.append(&state.indexes).map_err(DirError::from),
            &mut first_error,
        );

        let mut footer = Vec::with_capacity(FOOTER_LEN);
        filter_handle.encode_to(&mut footer);
        index_handle.encode_to(&mut footer);
        footer.resize(FOOTER_LEN, 0);
        record(sink.append(&footer).map_err(DirError::from), &mut first_error);

        record(sink.sync().map_err(DirError::from), &mut first_error);
        record(sink.close(false).map_err(DirError::from), &mut first_error);

        info!(
            blocks = (state.indexes.len() / 16).saturating_sub(1),
            data_end,
            filter_bytes = filter_len,
            ok = first_error.is_none(),
            "directory writer finished"
        );

        state.finish_outcome = Some(first_error.clone());
        self.shared.cv.notify_all();

        match first_error {
            Some(status) => Err(DirError::Background(status)),
            None => Ok(()),
        }
    }

    /// Shared i/o statistics of the sink, when enabled.
    pub fn io_stats(&self) -> Option<Arc<crate::env::IoStats>> {
        self.shared.sink.io_stats()
    }

    // --------------------------------------------------------------------------------------------
    // Rotation and compaction
    // --------------------------------------------------------------------------------------------

    /// Swap the active buffer against a free one and schedule its
    /// compaction under a fresh ticket. Blocks while no buffer is free.
    fn rotate_buffer<'a>(
        &'a self,
        mut state: MutexGuard<'a, WriterState>,
    ) -> Result<MutexGuard<'a, WriterState>, DirError> {
        while state.free.is_empty() && state.bg_status.is_none() {
            trace!("back-pressure: all buffers busy");
            state = self.cv_wait(state);
        }
        if let Some(status) = &state.bg_status {
            return Err(DirError::Background(Arc::clone(status)));
        }

        let Some(mut immutable) = state.free.pop() else {
            unreachable!("free list non-empty after back-pressure wait");
        };
        std::mem::swap(&mut state.active, &mut immutable);
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        state.num_bg += 1;
        trace!(
            ticket,
            entries = immutable.num_entries(),
            bytes = immutable.mem_usage(),
            "buffer rotated"
        );

        let shared = Arc::clone(&self.shared);
        if let Some(pool) = &self.shared.options.compaction_pool {
            pool.execute(move || WriterShared::compact(&shared, ticket, immutable));
        } else if self.shared.options.allow_env_threads {
            default_pool().execute(move || WriterShared::compact(&shared, ticket, immutable));
        } else {
            // Cooperative single-threaded mode: run on this thread with
            // the lock released.
            drop(state);
            WriterShared::compact(&shared, ticket, immutable);
            return Ok(self.lock());
        }
        Ok(state)
    }
}

impl WriterShared {
    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serialize one immutable buffer into a block + filter stripe and
    /// commit it in ticket order.
    fn compact(shared: &Arc<Self>, ticket: u32, mut buf: MemBuffer) {
        // Phase 1 — build block and filter outside the lock.
        let built = Self::build_artifacts(shared, &buf);

        // Phase 2 — the in-order commit barrier.
        let mut state = shared.lock();
        while state.last_committed + 1 != ticket {
            state = shared
                .cv
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(state);

        // Phase 3 — append outside the lock. The barrier admits one
        // committer at a time, so the sink sees blocks in ticket order.
        let committed = built.and_then(|(block, stripe)| {
            shared.sink.append(&block)?;
            Ok(stripe)
        });

        // Phase 4 — publish the commit and recycle the buffer.
        let mut state = shared.lock();
        match committed {
            Ok(stripe) => {
                state.filter_stream.extend_from_slice(&stripe);
                let filter_end = state.filter_stream.len() as u64;
                let data_end = shared.sink.ltell();
                put_fixed64(&mut state.indexes, filter_end);
                put_fixed64(&mut state.indexes, data_end);
                debug!(ticket, data_end, filter_end, "compaction committed");
            }
            Err(e) => {
                error!(ticket, error = %e, "compaction failed");
                if state.bg_status.is_none() {
                    state.bg_status = Some(Arc::new(e));
                }
            }
        }
        state.last_committed = ticket;
        buf.clear();
        state.free.push(buf);
        state.num_bg -= 1;
        shared.cv.notify_all();
    }

    /// Serialize `buf` into `(block_bytes, filter_stripe)`.
    ///
    /// In leveldb-compatible mode the records are stable-sorted by key
    /// and only the most recent write of each key survives (the block
    /// format demands strictly increasing keys). Unordered mode keeps
    /// insertion order and every record.
    fn build_artifacts(
        shared: &WriterShared,
        buf: &MemBuffer,
    ) -> Result<(Vec<u8>, Vec<u8>), DirError> {
        let options = &shared.options;
        let mut block = BlockBuilder::new(options);
        let mut filter = FilterBlock::new(options);
        if let Some(filter) = &mut filter {
            filter.reset(buf.num_entries());
        }

        if options.leveldb_compat {
            let mut order: Vec<usize> = (0..buf.num_entries()).collect();
            order.sort_by(|&a, &b| buf.entry_at(a).0.cmp(buf.entry_at(b).0));

            let mut i = 0;
            while i < order.len() {
                // Stable sort keeps duplicates in insertion order; the
                // last one is the most recent write.
                let mut last = i;
                while last + 1 < order.len()
                    && buf.entry_at(order[last + 1]).0 == buf.entry_at(order[i]).0
                {
                    last += 1;
                }
                let (key, value) = buf.entry_at(order[last]);
                block.add(key, value)?;
                if let Some(filter) = &mut filter {
                    filter.add_key(key);
                }
                i = last + 1;
            }
        } else {
            for (key, value) in buf.iter() {
                block.add(key, value)?;
                if let Some(filter) = &mut filter {
                    filter.add_key(key);
                }
            }
        }

        let block_bytes = block.finish()?;
        let stripe = filter.map(|mut f| f.finish()).unwrap_or_default();
        Ok((block_bytes, stripe))
    }
}

impl std::fmt::Debug for DirWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("DirWriter")
            .field("active_entries", &state.active.num_entries())
            .field("free_buffers", &state.free.len())
            .field("num_bg", &state.num_bg)
            .field("next_ticket", &state.next_ticket)
            .field("finished", &state.finished)
            .finish()
    }
}
