//! Uncompressed bitmap block.
//!
//! Intended for small fixed-width integer keys: the first four key
//! bytes are read as a little-endian `u32` and reduced into a
//! `2^key_bits` domain; one bit per domain point. Blob layout is
//! `[bitmap…][key_bits: u8]`.
//!
//! Reduction is the same on both sides, so no false negatives are
//! possible even for keys outside the domain; keys that collide under
//! the reduction cost a false positive.

use crate::filter::FilterBuilder;
use crate::options::DirOptions;

/// First four key bytes as LE `u32`, zero-padded for short keys.
fn key_value(key: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    let take = key.len().min(4);
    bytes[..take].copy_from_slice(&key[..take]);
    u32::from_le_bytes(bytes)
}

/// Widths above this are rejected by option validation; a blob claiming
/// more is treated as unreadable (may match).
const MAX_KEY_BITS: u8 = 28;

fn domain_mask(key_bits: u8) -> u32 {
    (1u32 << key_bits.min(MAX_KEY_BITS)) - 1
}

/// Bitmap filter builder over a `2^bm_key_bits` key domain.
pub struct BitmapBlock {
    key_bits: u8,
    bits: Vec<u8>,
}

impl BitmapBlock {
    /// Create a builder configured from `options`.
    pub fn new(options: &DirOptions) -> Self {
        Self {
            key_bits: options.bm_key_bits,
            bits: Vec::new(),
        }
    }
}

impl FilterBuilder for BitmapBlock {
    fn reset(&mut self, _expected_keys: usize) {
        // The bitmap is domain-sized, not key-count-sized.
        let domain = 1usize << self.key_bits.min(MAX_KEY_BITS);
        self.bits.clear();
        self.bits.resize(domain.div_ceil(8), 0);
    }

    fn add_key(&mut self, key: &[u8]) {
        if self.bits.is_empty() {
            return;
        }
        let idx = (key_value(key) & domain_mask(self.key_bits)) as usize;
        self.bits[idx / 8] |= 1 << (idx % 8);
    }

    fn finish(&mut self) -> Vec<u8> {
        let mut blob = std::mem::take(&mut self.bits);
        blob.push(self.key_bits);
        blob
    }
}

/// Membership test against a finished bitmap blob.
pub fn key_may_match(key: &[u8], blob: &[u8]) -> bool {
    let Some((&key_bits, bits)) = blob.split_last() else {
        return true;
    };
    if key_bits == 0 || key_bits > MAX_KEY_BITS {
        return true;
    }
    let idx = (key_value(key) & domain_mask(key_bits)) as usize;
    if idx / 8 >= bits.len() {
        // Truncated bitmap; degrade to a block read.
        return true;
    }
    (bits[idx / 8] >> (idx % 8)) & 1 == 1
}
