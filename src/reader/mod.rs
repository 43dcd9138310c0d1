//! The point-lookup path.
//!
//! [`DirReader`] makes a finished log self-serving: the fixed footer
//! locates the filter and index streams, both are cached in memory at
//! open, and each [`get`](DirReader::get) walks the per-block index
//! entries **newest first**, consulting the block's filter stripe
//! before touching the data log. Only blocks whose filter admits the
//! key are read and linearly searched.
//!
//! Within a block the *last* occurrence of a key wins, and blocks are
//! visited newest → oldest, so a `get` always observes the most recent
//! `add` of a key.
//!
//! The reader borrows the log through a [`LogSource`] and owns only
//! its metadata cache; it never mutates the log.

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, trace};

use crate::block::{BlockError, parse_block};
use crate::coding::{BlockHandle, FOOTER_LEN, get_fixed64};
use crate::filter;
use crate::log::{LogError, LogSource};
use crate::options::DirOptions;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced by the read path.
///
/// A missing key is not an error: [`DirReader::get`] returns
/// `Ok(None)`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReadError {
    /// Malformed metadata: truncated footer, inconsistent index or
    /// filter stream.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Error reading from the log source.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Malformed data block.
    #[error("block error: {0}")]
    Block(#[from] BlockError),
}

fn corruption(what: impl Into<String>) -> ReadError {
    ReadError::Corruption(what.into())
}

// ------------------------------------------------------------------------------------------------
// DirReader
// ------------------------------------------------------------------------------------------------

/// Snapshot of read-path counters from [`DirReader::stats`].
///
/// `blocks_read / gets` over a key sample approximates the filter
/// false-positive rate: a block is only read when its filter admitted
/// the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderStats {
    /// Number of `get` calls served.
    pub gets: u64,
    /// Number of data blocks read and verified.
    pub blocks_read: u64,
}

/// Random-access point reader over one finished directory log.
///
/// Must be opened with the same [`DirOptions`] the log was written
/// with — the filter choice and block mode are not recorded on disk.
pub struct DirReader {
    source: LogSource,
    options: DirOptions,

    /// Concatenated filter stripes, cached at open.
    filter_stream: Vec<u8>,

    /// Per-block `(filter_end, data_end)` pairs, sentinel included.
    index_pairs: Vec<(u64, u64)>,

    gets: AtomicU64,
    blocks_read: AtomicU64,
}

impl DirReader {
    /// Load the footer and metadata streams of a finished log.
    ///
    /// # Errors
    ///
    /// [`ReadError::Corruption`] when the footer is truncated, a
    /// handle points outside the log, the index length is not a
    /// non-empty multiple of 16, or the streams are inconsistent.
    pub fn open(source: LogSource, options: DirOptions) -> Result<Self, ReadError> {
        let total = source.total_size();
        if total < FOOTER_LEN as u64 {
            return Err(corruption(format!(
                "log shorter than a footer: {total} bytes"
            )));
        }

        let mut footer = vec![0u8; FOOTER_LEN];
        source.read_exact_at(&mut footer, total - FOOTER_LEN as u64)?;
        let mut cursor = footer.as_slice();
        let filter_handle = BlockHandle::decode_from(&mut cursor)
            .map_err(|e| corruption(format!("bad filter handle: {e}")))?;
        let index_handle = BlockHandle::decode_from(&mut cursor)
            .map_err(|e| corruption(format!("bad index handle: {e}")))?;

        let in_bounds = |handle: &BlockHandle| {
            handle
                .offset
                .checked_add(handle.size)
                .is_some_and(|end| end <= total)
        };
        if !in_bounds(&filter_handle) || !in_bounds(&index_handle) {
            return Err(corruption("footer handle outside the log"));
        }

        if index_handle.size < 16 || index_handle.size % 16 != 0 {
            return Err(corruption(format!(
                "index stream length {} is not a non-empty multiple of 16",
                index_handle.size
            )));
        }

        let mut filter_stream = vec![0u8; filter_handle.size as usize];
        source.read_exact_at(&mut filter_stream, filter_handle.offset)?;

        let mut index_raw = vec![0u8; index_handle.size as usize];
        source.read_exact_at(&mut index_raw, index_handle.offset)?;

        let mut cursor = index_raw.as_slice();
        let mut index_pairs = Vec::with_capacity(index_raw.len() / 16);
        while !cursor.is_empty() {
            let filter_end = get_fixed64(&mut cursor)
                .map_err(|e| corruption(format!("bad index entry: {e}")))?;
            let data_end = get_fixed64(&mut cursor)
                .map_err(|e| corruption(format!("bad index entry: {e}")))?;
            index_pairs.push((filter_end, data_end));
        }

        // Both coordinate sequences are monotone by construction;
        // anything else means the streams do not belong together.
        let mut prev = (0u64, 0u64);
        for &(filter_end, data_end) in &index_pairs {
            if filter_end < prev.0 || data_end < prev.1 {
                return Err(corruption("index entries regress"));
            }
            prev = (filter_end, data_end);
        }
        if prev.0 != filter_handle.size {
            return Err(corruption(format!(
                "filter stream length {} does not match final index entry {}",
                filter_handle.size, prev.0
            )));
        }
        if prev.1 > filter_handle.offset {
            return Err(corruption("data blocks overlap the filter stream"));
        }

        debug!(
            blocks = index_pairs.len() - 1,
            filter_bytes = filter_stream.len(),
            total,
            "directory reader opened"
        );

        Ok(Self {
            source,
            options,
            filter_stream,
            index_pairs,
            gets: AtomicU64::new(0),
            blocks_read: AtomicU64::new(0),
        })
    }

    /// Look up the most recently added value of `key`.
    ///
    /// Returns `Ok(None)` when no block contains the key. Read or
    /// verification failures abort the lookup and are returned
    /// verbatim.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ReadError> {
        self.gets.fetch_add(1, Ordering::Relaxed);

        // Newest block first; the implicit leading (0, 0) pair gives
        // the first block its window, and the sentinel's empty window
        // is skipped.
        for i in (0..self.index_pairs.len()).rev() {
            let (filter_end, data_end) = self.index_pairs[i];
            let (filter_start, data_start) = if i == 0 {
                (0, 0)
            } else {
                self.index_pairs[i - 1]
            };
            if data_end == data_start {
                continue;
            }

            let stripe = &self.filter_stream[filter_start as usize..filter_end as usize];
            if !filter::key_may_match(&self.options, key, stripe) {
                continue;
            }
            trace!(block = i, data_start, data_end, "filter hit, reading block");
            self.blocks_read.fetch_add(1, Ordering::Relaxed);

            let mut raw = vec![0u8; (data_end - data_start) as usize];
            self.source.read_exact_at(&mut raw, data_start)?;
            let contents = parse_block(&raw)?;

            // Linear scan; the last occurrence in a block is the most
            // recent write.
            let mut found = None;
            for entry in contents.iter(self.options.leveldb_compat) {
                let (entry_key, entry_value) = entry?;
                if entry_key == key {
                    found = Some(entry_value);
                }
            }
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Number of data blocks in the log.
    pub fn num_blocks(&self) -> usize {
        self.index_pairs.len() - 1
    }

    /// Snapshot of the read-path counters.
    pub fn stats(&self) -> ReaderStats {
        ReaderStats {
            gets: self.gets.load(Ordering::Relaxed),
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
        }
    }

    /// Total logical size of the underlying log.
    pub fn total_size(&self) -> u64 {
        self.source.total_size()
    }
}

impl std::fmt::Debug for DirReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirReader")
            .field("blocks", &self.num_blocks())
            .field("filter_bytes", &self.filter_stream.len())
            .field("total", &self.source.total_size())
            .finish()
    }
}
