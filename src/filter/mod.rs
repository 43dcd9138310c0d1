//! Point-membership filters.
//!
//! One filter stripe is built per data block and written into the
//! filter stream; at read time the stripe decides whether the block can
//! contain a key at all. False positives are allowed (they cost one
//! block read), false negatives never occur.
//!
//! Three interchangeable implementations, selected per directory via
//! [`DirOptions::filter`]:
//!
//! | Variant | Module | Blob suffix |
//! |---------|--------|-------------|
//! | Bloom   | [`bloom`]  | `[bits…][num_hashes: u8]` |
//! | Bitmap  | [`bitmap`] | `[bitmap…][key_bits: u8]` |
//! | Cuckoo  | [`cuckoo`] | `[tables…][num_tables: u32][bucket_count: u32][fp_bits: u8][val_bits: u8][tag: u8]` |
//!
//! Each blob is self-describing given the directory's filter choice;
//! the final byte distinguishes variants where it matters (cuckoo plain
//! vs. values).
//!
//! All variants hash with xxh3. A malformed blob is answered with
//! "may match" so a corrupted stripe degrades to a block read instead
//! of losing data.


pub mod bitmap;
pub mod bloom;
pub mod cuckoo;

pub use bitmap::BitmapBlock;
pub use bloom::BloomBlock;
pub use cuckoo::CuckooBlock;

use crate::options::{DirOptions, FilterType};

// ------------------------------------------------------------------------------------------------
// Builder contract
// ------------------------------------------------------------------------------------------------

/// Incremental construction of one filter stripe.
///
/// Builders are reused across blocks: `reset(expected_keys)` sizes the
/// structure, `add_key` inserts, `finish` emits the blob and re-arms
/// the builder.
pub trait FilterBuilder {
    /// Size the structure for roughly `expected_keys` insertions,
    /// discarding previous state. Over-allocation is permitted.
    fn reset(&mut self, expected_keys: usize);

    /// Insert one key. Inserting the same key twice does not change
    /// membership.
    fn add_key(&mut self, key: &[u8]);

    /// Emit the self-describing blob and return to the empty state.
    fn finish(&mut self) -> Vec<u8>;
}

// ------------------------------------------------------------------------------------------------
// Per-directory dispatch
// ------------------------------------------------------------------------------------------------

/// The filter builder selected by a directory's options.
pub enum FilterBlock {
    /// Classic k-hash bloom block.
    Bloom(BloomBlock),
    /// Uncompressed bitmap block.
    Bitmap(BitmapBlock),
    /// 4-way cuckoo block.
    Cuckoo(CuckooBlock),
}

impl FilterBlock {
    /// Construct the builder for `options.filter`; `None` when filters
    /// are disabled.
    pub fn new(options: &DirOptions) -> Option<Self> {
        match options.filter {
            FilterType::NoFilter => None,
            FilterType::Bloom => Some(Self::Bloom(BloomBlock::new(options))),
            FilterType::Bitmap => Some(Self::Bitmap(BitmapBlock::new(options))),
            FilterType::Cuckoo => Some(Self::Cuckoo(CuckooBlock::new(options))),
        }
    }
}

impl FilterBuilder for FilterBlock {
    fn reset(&mut self, expected_keys: usize) {
        match self {
            Self::Bloom(b) => b.reset(expected_keys),
            Self::Bitmap(b) => b.reset(expected_keys),
            Self::Cuckoo(b) => b.reset(expected_keys),
        }
    }

    fn add_key(&mut self, key: &[u8]) {
        match self {
            Self::Bloom(b) => b.add_key(key),
            Self::Bitmap(b) => b.add_key(key),
            Self::Cuckoo(b) => b.add_key(key),
        }
    }

    fn finish(&mut self) -> Vec<u8> {
        match self {
            Self::Bloom(b) => b.finish(),
            Self::Bitmap(b) => b.finish(),
            Self::Cuckoo(b) => b.finish(),
        }
    }
}

/// Membership test against a finished stripe, dispatched on the
/// directory's filter choice.
///
/// An empty blob answers "may match": an empty stripe next to a
/// non-empty block means filters were disabled for that block.
pub fn key_may_match(options: &DirOptions, key: &[u8], blob: &[u8]) -> bool {
    if blob.is_empty() {
        return true;
    }
    match options.filter {
        FilterType::NoFilter => true,
        FilterType::Bloom => bloom::key_may_match(key, blob),
        FilterType::Bitmap => bitmap::key_may_match(key, blob),
        FilterType::Cuckoo => cuckoo::key_may_match(key, blob),
    }
}

// ------------------------------------------------------------------------------------------------
// Bit-level helpers shared by the packed variants
// ------------------------------------------------------------------------------------------------

/// Read `width` bits (≤ 64) starting at absolute bit `bit_off`.
pub(crate) fn read_bits(bits: &[u8], bit_off: usize, width: usize) -> u64 {
    let mut out = 0u64;
    for i in 0..width {
        let bit = bit_off + i;
        if (bits[bit / 8] >> (bit % 8)) & 1 == 1 {
            out |= 1 << i;
        }
    }
    out
}

/// Write `width` bits (≤ 64) of `value` starting at absolute bit
/// `bit_off`.
pub(crate) fn write_bits(bits: &mut [u8], bit_off: usize, width: usize, value: u64) {
    for i in 0..width {
        let bit = bit_off + i;
        let mask = 1u8 << (bit % 8);
        if (value >> i) & 1 == 1 {
            bits[bit / 8] |= mask;
        } else {
            bits[bit / 8] &= !mask;
        }
    }
}
