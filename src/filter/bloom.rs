//! Classic k-hash bloom block.
//!
//! The blob is the bit array followed by a single byte holding the
//! number of probes: `[bits…][num_hashes: u8]`. The bit count is
//! implied by the blob length.
//!
//! Probing uses xxh3-128 double hashing: the 128-bit digest is split
//! into `(h1, h2)` and the i-th probe reads bit `h1 % m` with
//! `h1 += h2; h2 *= i` between probes, so one hash computation serves
//! all `k` probes.

use xxhash_rust::xxh3::xxh3_128;

use crate::filter::FilterBuilder;
use crate::options::DirOptions;

/// Probe counts above this are treated as a format from the future and
/// answered with "may match".
const MAX_NUM_HASHES: u8 = 30;

/// Split one 128-bit digest into the double-hashing pair.
fn composite_hash(key: &[u8]) -> (u64, u64) {
    let h = xxh3_128(key);
    ((h >> 64) as u64, h as u64)
}

/// Bloom filter builder with `bf_bits_per_key` bits per expected key.
pub struct BloomBlock {
    bits_per_key: usize,
    num_hashes: u8,
    bits: Vec<u8>,
}

impl BloomBlock {
    /// Create a builder configured from `options`.
    pub fn new(options: &DirOptions) -> Self {
        // k = bits_per_key × ln 2 minimizes the false-positive rate.
        let k = ((options.bf_bits_per_key as f64) * 0.69) as u8;
        Self {
            bits_per_key: options.bf_bits_per_key,
            num_hashes: k.clamp(1, MAX_NUM_HASHES),
            bits: Vec::new(),
        }
    }

    fn bit_count(&self) -> usize {
        self.bits.len() * 8
    }
}

impl FilterBuilder for BloomBlock {
    fn reset(&mut self, expected_keys: usize) {
        // Round up small filters to cut the false-positive rate of
        // nearly-empty blocks.
        let bit_len = (expected_keys * self.bits_per_key).max(64);
        self.bits.clear();
        self.bits.resize(bit_len.div_ceil(8), 0);
    }

    fn add_key(&mut self, key: &[u8]) {
        let m = self.bit_count() as u64;
        if m == 0 {
            return;
        }
        let (mut h1, mut h2) = composite_hash(key);
        for i in 1..=(self.num_hashes as u64) {
            let idx = (h1 % m) as usize;
            self.bits[idx / 8] |= 1 << (idx % 8);
            h1 = h1.wrapping_add(h2);
            h2 = h2.wrapping_mul(i);
        }
    }

    fn finish(&mut self) -> Vec<u8> {
        let mut blob = std::mem::take(&mut self.bits);
        blob.push(self.num_hashes);
        blob
    }
}

/// Membership test against a finished bloom blob.
///
/// Never a false negative for keys inserted via
/// [`add_key`](FilterBuilder::add_key).
pub fn key_may_match(key: &[u8], blob: &[u8]) -> bool {
    let Some((&num_hashes, bits)) = blob.split_last() else {
        return true;
    };
    if num_hashes == 0 || num_hashes > MAX_NUM_HASHES {
        // Reserved for future encodings; match everything.
        return true;
    }
    let m = (bits.len() * 8) as u64;
    if m == 0 {
        return true;
    }

    let (mut h1, mut h2) = composite_hash(key);
    for i in 1..=(num_hashes as u64) {
        let idx = (h1 % m) as usize;
        if (bits[idx / 8] >> (idx % 8)) & 1 == 0 {
            return false;
        }
        h1 = h1.wrapping_add(h2);
        h2 = h2.wrapping_mul(i);
    }
    true
}
