//! Engine configuration.
//!
//! [`DirOptions`] collects every tunable of the write and read paths in
//! one flat struct, mirroring the on-disk contract: the same options
//! value used to write a directory must be used to read it back (filter
//! choice and block mode are not recorded in the file).
//!
//! All sizes are in bytes. Defaults favor a 4 MiB memory footprint with
//! 32 KiB blocks and a bloom filter at 8 bits per key.

use std::sync::Arc;

use thiserror::Error;

use crate::env::ThreadPool;

/// Errors produced by [`DirOptions::validate`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OptionsError {
    /// A field holds a value outside its legal range.
    #[error("invalid option: {0}")]
    InvalidArgument(String),
}

/// Point-membership filter attached to each data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    /// No filter stripes are emitted; every `get` reads every block.
    NoFilter,
    /// Classic k-hash bloom filter (`bf_bits_per_key` bits per key).
    Bloom,
    /// Uncompressed bitmap over the first four key bytes
    /// (`bm_key_bits`-bit domain). Only sensible for small fixed-width
    /// integer keys.
    Bitmap,
    /// 4-way cuckoo filter with auxiliary-table spill.
    Cuckoo,
}

/// Per-block compression applied before the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Store the payload verbatim.
    None,
    /// Snappy-compress the payload. Disables block padding.
    Snappy,
}

impl Compression {
    /// The single-byte tag written into the block trailer.
    pub fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Snappy => 1,
        }
    }

    /// Decode a trailer tag back into a variant.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Compression::None),
            1 => Some(Compression::Snappy),
            _ => None,
        }
    }
}

/// Configuration for one logical directory (a [`DirWriter`] /
/// [`DirReader`] pair).
///
/// [`DirWriter`]: crate::writer::DirWriter
/// [`DirReader`]: crate::reader::DirReader
#[derive(Clone)]
pub struct DirOptions {
    /// Upper bound on RAM across all in-memory write buffers.
    pub total_memtable_budget: usize,

    /// Rotation threshold as a fraction of the per-buffer size.
    /// A buffer rotates once it holds more than
    /// `total_memtable_budget / num_bufs × memtable_util` bytes.
    pub memtable_util: f64,

    /// Total number of write buffers (one active, the rest immutable or
    /// free). Must be at least 2 for double buffering.
    pub num_bufs: usize,

    /// Target uncompressed data block size.
    pub block_size: usize,

    /// Restart point spacing for leveldb-compatible blocks.
    pub block_restart_interval: usize,

    /// Zero-pad uncompressed blocks so each lands on a `write_size`
    /// boundary with the trailer at the physical end.
    pub block_padding: bool,

    /// Physical write unit used by `block_padding`.
    pub write_size: usize,

    /// Block entry encoding: `true` selects the sorted, delta-encoded,
    /// restart-indexed format; `false` (default) the unordered
    /// length-prefixed format.
    pub leveldb_compat: bool,

    /// Filter attached to every block.
    pub filter: FilterType,

    /// Bloom bits per key.
    pub bf_bits_per_key: usize,

    /// Bitmap key-domain width in bits (keys are read as 4-byte LE).
    pub bm_key_bits: u8,

    /// Cuckoo target load factor; a negative value sizes the table to
    /// exactly `ceil(num_keys / 4)` buckets.
    pub cuckoo_frac: f64,

    /// Eviction chain length before the cuckoo builder spills to an
    /// auxiliary table (or, in strict mode, reports failure).
    pub cuckoo_max_moves: usize,

    /// Per-block compression.
    pub compression: Compression,

    /// Write-buffer capacity of the sink; `0` disables buffering.
    pub sink_buffer: usize,

    /// Count bytes/ops/syncs through the sink.
    pub sink_io_stats: bool,

    /// Open the sink in rotating mode (`<prefix>.dat.<index>` naming).
    pub rotation: bool,

    /// Shared worker pool for background compaction. `None` runs
    /// compaction inline unless `allow_env_threads` is set.
    pub compaction_pool: Option<Arc<ThreadPool>>,

    /// Permit use of the process-wide default pool when no explicit
    /// `compaction_pool` is configured.
    pub allow_env_threads: bool,
}

impl Default for DirOptions {
    fn default() -> Self {
        Self {
            total_memtable_budget: 4 << 20,
            memtable_util: 0.97,
            num_bufs: 2,
            block_size: 32 << 10,
            block_restart_interval: 16,
            block_padding: true,
            write_size: 4 << 10,
            leveldb_compat: false,
            filter: FilterType::Bloom,
            bf_bits_per_key: 8,
            bm_key_bits: 24,
            cuckoo_frac: 0.95,
            cuckoo_max_moves: 500,
            compression: Compression::None,
            sink_buffer: 64 << 10,
            sink_io_stats: false,
            rotation: false,
            compaction_pool: None,
            allow_env_threads: false,
        }
    }
}

impl DirOptions {
    /// Check the option set for internally inconsistent values.
    ///
    /// Called by [`DirWriter::open`](crate::writer::DirWriter::open).
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.num_bufs < 2 {
            return Err(OptionsError::InvalidArgument(format!(
                "num_bufs must be >= 2, got {}",
                self.num_bufs
            )));
        }
        if self.total_memtable_budget == 0 {
            return Err(OptionsError::InvalidArgument(
                "total_memtable_budget must be non-zero".into(),
            ));
        }
        if !(self.memtable_util > 0.0 && self.memtable_util <= 1.0) {
            return Err(OptionsError::InvalidArgument(format!(
                "memtable_util must be in (0, 1], got {}",
                self.memtable_util
            )));
        }
        if self.block_restart_interval == 0 {
            return Err(OptionsError::InvalidArgument(
                "block_restart_interval must be non-zero".into(),
            ));
        }
        if self.block_padding && self.write_size == 0 {
            return Err(OptionsError::InvalidArgument(
                "write_size must be non-zero when block_padding is set".into(),
            ));
        }
        if self.bm_key_bits == 0 || self.bm_key_bits > 28 {
            return Err(OptionsError::InvalidArgument(format!(
                "bm_key_bits must be in 1..=28, got {}",
                self.bm_key_bits
            )));
        }
        Ok(())
    }

    /// Per-buffer rotation threshold derived from the memtable budget.
    pub(crate) fn buf_threshold(&self) -> usize {
        let per_buf = self.total_memtable_budget / self.num_bufs;
        (per_buf as f64 * self.memtable_util) as usize
    }
}

impl std::fmt::Debug for DirOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirOptions")
            .field("total_memtable_budget", &self.total_memtable_budget)
            .field("memtable_util", &self.memtable_util)
            .field("num_bufs", &self.num_bufs)
            .field("block_size", &self.block_size)
            .field("block_padding", &self.block_padding)
            .field("leveldb_compat", &self.leveldb_compat)
            .field("filter", &self.filter)
            .field("compression", &self.compression)
            .field("rotation", &self.rotation)
            .field("has_pool", &self.compaction_pool.is_some())
            .field("allow_env_threads", &self.allow_env_threads)
            .finish_non_exhaustive()
    }
}
