//! Self-describing data blocks.
//!
//! A block is an immutable byte string: a payload of key/value entries
//! followed by a 5-byte trailer. The trailer is always the physically
//! last thing in the block.
//!
//! # On-disk layout
//!
//! ```text
//! [num_entries: u32 LE]
//! [entry]…                       (mode-specific, see below)
//! [restart array]                (leveldb-compatible mode only)
//! [zero padding]                 (uncompressed blocks, optional)
//! [compression_type: u8]
//! [masked crc32c: u32 LE]        (covers payload || compression_type)
//! ```
//!
//! Two entry encodings, fixed at construction:
//!
//! - **fixed-kv** — `[klen: u32][key][vlen: u32][value]`; insertion
//!   order is preserved and unordered keys are admitted.
//! - **leveldb-compatible** — delta-encoded
//!   `[shared: varint][unshared: varint][vlen: varint][key suffix][value]`
//!   with a restart point every `block_restart_interval` entries and the
//!   restart array `[offset: u32]… [count: u32]` after the entries.
//!   Keys must be added in strictly increasing order.
//!
//! The CRC is CRC32C (castagnoli) masked with
//! `rot_right(crc, 15) + 0xa282ead8` so that checksums of checksummed
//! data do not collide with the data itself.
//!
//! When `block_padding` is set and the block stays uncompressed, the
//! payload is zero-extended so the full block (payload + trailer) lands
//! on a `write_size` boundary.


use thiserror::Error;
use tracing::warn;

use crate::coding::{get_fixed32, get_varint64, put_fixed32, put_varint64};
use crate::options::{Compression, DirOptions};

/// Trailer size: one compression byte plus a 4-byte masked CRC.
pub const BLOCK_TRAILER_LEN: usize = 5;

/// Byte offset where entries begin (after the `num_entries` header).
const ENTRY_BASE: usize = 4;

/// Mask delta for stored CRCs (the standard castagnoli mask constant).
const CRC_MASK_DELTA: u32 = 0xa282_ead8;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced while building or parsing blocks.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlockError {
    /// Malformed block bytes: bad checksum, truncation, unordered keys.
    #[error("corruption: {0}")]
    Corruption(String),

    /// `add` after `finish` without an intervening `reset`.
    #[error("block builder already finished")]
    Finished,
}

// ------------------------------------------------------------------------------------------------
// CRC masking
// ------------------------------------------------------------------------------------------------

/// Mask a raw CRC32C for storage.
pub fn mask_crc(crc: u32) -> u32 {
    (crc.rotate_right(15)).wrapping_add(CRC_MASK_DELTA)
}

/// The masked checksum of `payload || type_byte`.
fn block_crc(payload: &[u8], type_byte: u8) -> u32 {
    let digest = crc32c::crc32c(payload);
    mask_crc(crc32c::crc32c_append(digest, &[type_byte]))
}

// ------------------------------------------------------------------------------------------------
// BlockBuilder
// ------------------------------------------------------------------------------------------------

/// Serializes one batch of key/value records into a block.
///
/// Reusable: `finish` emits the block and a later `reset` re-arms the
/// builder with its buffers retained.
pub struct BlockBuilder {
    buf: Vec<u8>,
    restarts: Vec<u32>,
    restart_counter: usize,
    last_key: Vec<u8>,
    num_entries: u32,
    finished: bool,

    leveldb_compat: bool,
    restart_interval: usize,
    padding: Option<usize>,
    compression: Compression,
}

impl BlockBuilder {
    /// Create a builder configured from `options`.
    pub fn new(options: &DirOptions) -> Self {
        let mut buf = Vec::with_capacity(options.block_size + BLOCK_TRAILER_LEN);
        buf.resize(ENTRY_BASE, 0);
        Self {
            buf,
            restarts: vec![0],
            restart_counter: 0,
            last_key: Vec::new(),
            num_entries: 0,
            finished: false,
            leveldb_compat: options.leveldb_compat,
            restart_interval: options.block_restart_interval,
            padding: (options.block_padding && options.write_size > 0)
                .then_some(options.write_size),
            compression: options.compression,
        }
    }

    /// Append one record.
    ///
    /// # Errors
    ///
    /// [`BlockError::Corruption`] in leveldb-compatible mode when `key`
    /// is not strictly greater than the previous key;
    /// [`BlockError::Finished`] after `finish`.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<(), BlockError> {
        if self.finished {
            return Err(BlockError::Finished);
        }

        if self.leveldb_compat {
            if self.num_entries > 0 && key <= self.last_key.as_slice() {
                return Err(BlockError::Corruption(format!(
                    "keys out of order: {:?} after {:?}",
                    key, self.last_key
                )));
            }

            let shared = if self.restart_counter < self.restart_interval {
                key.iter()
                    .zip(self.last_key.iter())
                    .take_while(|(a, b)| a == b)
                    .count()
            } else {
                self.restarts.push((self.buf.len() - ENTRY_BASE) as u32);
                self.restart_counter = 0;
                0
            };
            self.restart_counter += 1;

            put_varint64(&mut self.buf, shared as u64);
            put_varint64(&mut self.buf, (key.len() - shared) as u64);
            put_varint64(&mut self.buf, value.len() as u64);
            self.buf.extend_from_slice(&key[shared..]);
            self.buf.extend_from_slice(value);
        } else {
            put_fixed32(&mut self.buf, key.len() as u32);
            self.buf.extend_from_slice(key);
            put_fixed32(&mut self.buf, value.len() as u32);
            self.buf.extend_from_slice(value);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        Ok(())
    }

    /// Records added since the last reset.
    pub fn num_entries(&self) -> u32 {
        self.num_entries
    }

    /// Current serialized size, trailer included.
    pub fn size_estimate(&self) -> usize {
        let restart_tail = if self.leveldb_compat {
            (self.restarts.len() + 1) * 4
        } else {
            0
        };
        self.buf.len() + restart_tail + BLOCK_TRAILER_LEN
    }

    /// Finalize the block: entry count header, restart array (sorted
    /// mode), optional compression, optional padding, and the trailer.
    ///
    /// The builder refuses further `add` calls until [`reset`](Self::reset).
    pub fn finish(&mut self) -> Result<Vec<u8>, BlockError> {
        if self.finished {
            return Err(BlockError::Finished);
        }
        self.finished = true;

        self.buf[..ENTRY_BASE].copy_from_slice(&self.num_entries.to_le_bytes());
        if self.leveldb_compat {
            for &restart in &self.restarts {
                put_fixed32(&mut self.buf, restart);
            }
            put_fixed32(&mut self.buf, self.restarts.len() as u32);
        }

        // Compression, falling back to raw storage when it does not pay.
        let (mut payload, type_byte) = match self.compression {
            Compression::None => (std::mem::take(&mut self.buf), Compression::None.tag()),
            Compression::Snappy => {
                let compressed = snap::raw::Encoder::new()
                    .compress_vec(&self.buf)
                    .map_err(|e| BlockError::Corruption(format!("snappy encode: {e}")))?;
                if compressed.len() < self.buf.len() {
                    (compressed, Compression::Snappy.tag())
                } else {
                    (std::mem::take(&mut self.buf), Compression::None.tag())
                }
            }
        };

        // Padding keeps the trailer on a write_size boundary; a
        // compressed payload is never padded (the zeros would not
        // survive decompression).
        if type_byte == Compression::None.tag()
            && let Some(unit) = self.padding
        {
            let total = payload.len() + BLOCK_TRAILER_LEN;
            let rem = total % unit;
            if rem != 0 {
                payload.resize(payload.len() + (unit - rem), 0);
            }
        }

        let crc = block_crc(&payload, type_byte);
        payload.push(type_byte);
        put_fixed32(&mut payload, crc);
        Ok(payload)
    }

    /// Return the builder to its empty state, retaining capacity.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.buf.resize(ENTRY_BASE, 0);
        self.restarts.clear();
        self.restarts.push(0);
        self.restart_counter = 0;
        self.last_key.clear();
        self.num_entries = 0;
        self.finished = false;
    }
}

// ------------------------------------------------------------------------------------------------
// Block parsing
// ------------------------------------------------------------------------------------------------

/// A verified, decompressed block payload.
#[derive(Debug)]
pub struct BlockContents {
    data: Vec<u8>,
    num_entries: u32,
}

impl BlockContents {
    /// Number of records in the block.
    pub fn num_entries(&self) -> u32 {
        self.num_entries
    }

    /// Iterate the records linearly.
    pub fn iter(&self, leveldb_compat: bool) -> BlockIter<'_> {
        BlockIter {
            data: &self.data[ENTRY_BASE..],
            remaining: self.num_entries,
            leveldb_compat,
            last_key: Vec::new(),
        }
    }
}

/// Verify the trailer of `raw`, strip it, decompress if needed, and
/// expose the payload.
///
/// # Errors
///
/// [`BlockError::Corruption`] on truncation, checksum mismatch, an
/// unknown compression tag, or a failed decompression.
pub fn parse_block(raw: &[u8]) -> Result<BlockContents, BlockError> {
    if raw.len() < BLOCK_TRAILER_LEN + ENTRY_BASE {
        return Err(BlockError::Corruption(format!(
            "block too short: {} bytes",
            raw.len()
        )));
    }

    let payload = &raw[..raw.len() - BLOCK_TRAILER_LEN];
    let type_byte = raw[raw.len() - BLOCK_TRAILER_LEN];
    let mut crc_bytes = &raw[raw.len() - 4..];
    let stored = get_fixed32(&mut crc_bytes)
        .map_err(|_| BlockError::Corruption("truncated block trailer".into()))?;

    let expected = block_crc(payload, type_byte);
    if stored != expected {
        warn!(stored, expected, "block checksum mismatch");
        return Err(BlockError::Corruption("block checksum mismatch".into()));
    }

    let data = match Compression::from_tag(type_byte) {
        Some(Compression::None) => payload.to_vec(),
        Some(Compression::Snappy) => snap::raw::Decoder::new()
            .decompress_vec(payload)
            .map_err(|e| BlockError::Corruption(format!("snappy decode: {e}")))?,
        None => {
            return Err(BlockError::Corruption(format!(
                "unknown compression tag {type_byte:#04x}"
            )));
        }
    };

    if data.len() < ENTRY_BASE {
        return Err(BlockError::Corruption("block payload too short".into()));
    }
    let mut header = &data[..ENTRY_BASE];
    let num_entries = get_fixed32(&mut header)
        .map_err(|_| BlockError::Corruption("truncated entry count".into()))?;

    Ok(BlockContents { data, num_entries })
}

// ------------------------------------------------------------------------------------------------
// BlockIter
// ------------------------------------------------------------------------------------------------

/// Linear, count-bounded walk over a block's records.
///
/// Works for both entry encodings; in leveldb-compatible mode the
/// shared-prefix chain is reconstructed as it goes. No comparator is
/// involved, so unordered blocks iterate in insertion order.
pub struct BlockIter<'a> {
    data: &'a [u8],
    remaining: u32,
    leveldb_compat: bool,
    last_key: Vec<u8>,
}

impl BlockIter<'_> {
    fn next_entry(&mut self) -> Result<(Vec<u8>, Vec<u8>), BlockError> {
        let corrupt = |what: &str| BlockError::Corruption(format!("truncated entry: {what}"));

        if self.leveldb_compat {
            let shared = get_varint64(&mut self.data).map_err(|_| corrupt("shared len"))? as usize;
            let unshared =
                get_varint64(&mut self.data).map_err(|_| corrupt("unshared len"))? as usize;
            let vlen = get_varint64(&mut self.data).map_err(|_| corrupt("value len"))? as usize;

            if shared > self.last_key.len() {
                return Err(BlockError::Corruption(
                    "shared prefix longer than previous key".into(),
                ));
            }
            if self.data.len() < unshared + vlen {
                return Err(corrupt("entry body"));
            }

            let mut key = Vec::with_capacity(shared + unshared);
            key.extend_from_slice(&self.last_key[..shared]);
            key.extend_from_slice(&self.data[..unshared]);
            let value = self.data[unshared..unshared + vlen].to_vec();
            self.data = &self.data[unshared + vlen..];

            self.last_key.clone_from(&key);
            Ok((key, value))
        } else {
            let klen = get_fixed32(&mut self.data).map_err(|_| corrupt("key len"))? as usize;
            if self.data.len() < klen {
                return Err(corrupt("key"));
            }
            let key = self.data[..klen].to_vec();
            self.data = &self.data[klen..];

            let vlen = get_fixed32(&mut self.data).map_err(|_| corrupt("value len"))? as usize;
            if self.data.len() < vlen {
                return Err(corrupt("value"));
            }
            let value = self.data[..vlen].to_vec();
            self.data = &self.data[vlen..];
            Ok((key, value))
        }
    }
}

impl Iterator for BlockIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>), BlockError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let entry = self.next_entry();
        if entry.is_err() {
            // Poison the iterator; a truncated entry makes everything
            // after it unreadable.
            self.remaining = 0;
        }
        Some(entry)
    }
}
