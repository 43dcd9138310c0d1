//! 4-way cuckoo filter block, optionally carrying per-slot values.
//!
//! Fingerprints (and values, when present) are bit-packed into
//! fixed-capacity tables of `bucket_count` buckets × 4 slots. A zero
//! fingerprint marks a free slot; real fingerprints are wrapped to
//! non-zero.
//!
//! Insertion places a fingerprint in one of its two candidate buckets,
//! evicting random victims along a bounded chain when both are full.
//! When the chain is exhausted the builder either reports failure
//! ([`CuckooBlock::test_add_key`], strict mode — the table is restored
//! to its pre-insert state) or allocates a fresh auxiliary table of the
//! same geometry and parks the stranded fingerprint there
//! ([`add_key`](crate::filter::FilterBuilder::add_key)). Every
//! relocation moves a fingerprint between its own two buckets, so
//! membership never develops false negatives.
//!
//! # Blob layout
//!
//! ```text
//! [table_0 bits…][table_1 bits…]…
//! [num_tables: u32 LE][bucket_count: u32 LE]
//! [bits_per_fingerprint: u8][bits_per_value: u8][variant_tag: u8]
//! ```
//!
//! Bucket counts are always a power of two so the XOR alternate-bucket
//! mapping is an exact involution.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use xxhash_rust::xxh3::xxh3_64;

use crate::coding::put_fixed32;
use crate::filter::{FilterBuilder, read_bits, write_bits};
use crate::options::DirOptions;

/// Slots per bucket.
pub const CUCKOO_WAYS: usize = 4;

/// Variant tag for fingerprint-only tables.
pub const CUCKOO_PLAIN_TAG: u8 = 0x10;

/// Variant tag for tables carrying a value payload per slot.
pub const CUCKOO_VALUES_TAG: u8 = 0x11;

/// `num_tables + bucket_count + fp_bits + val_bits + tag`.
const SUFFIX_LEN: usize = 4 + 4 + 1 + 1 + 1;

/// Eviction victim selection is deterministic across runs.
const RNG_SEED: u64 = 301;

// ------------------------------------------------------------------------------------------------
// Geometry — shared by builder and matcher
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Geometry {
    nbuckets: usize,
    fp_bits: u8,
    val_bits: u8,
}

impl Geometry {
    fn slot_width(&self) -> usize {
        (self.fp_bits + self.val_bits) as usize
    }

    fn table_bytes(&self) -> usize {
        (self.nbuckets * CUCKOO_WAYS * self.slot_width()).div_ceil(8)
    }

    fn fp_mask(&self) -> u64 {
        (1u64 << self.fp_bits) - 1
    }

    fn val_mask(&self) -> u64 {
        (1u64 << self.val_bits) - 1
    }

    /// Fingerprint from the upper hash half, wrapped to non-zero.
    fn fingerprint(&self, hash: u64) -> u32 {
        let fp = ((hash >> 32) & self.fp_mask()) as u32;
        if fp == 0 { 1 } else { fp }
    }

    /// Primary bucket from the lower hash half.
    fn primary_bucket(&self, hash: u64) -> usize {
        (hash as usize) & (self.nbuckets - 1)
    }

    /// The other bucket of `fp`: an involution because `nbuckets` is a
    /// power of two.
    fn alt_bucket(&self, bucket: usize, fp: u32) -> usize {
        let fp_hash = xxh3_64(&fp.to_le_bytes()) as usize;
        (bucket ^ fp_hash) & (self.nbuckets - 1)
    }

    fn slot_bit(&self, bucket: usize, way: usize) -> usize {
        (bucket * CUCKOO_WAYS + way) * self.slot_width()
    }

    fn slot_get(&self, table: &[u8], bucket: usize, way: usize) -> (u32, u32) {
        let bit = self.slot_bit(bucket, way);
        let slot = read_bits(table, bit, self.slot_width());
        let fp = (slot & self.fp_mask()) as u32;
        let val = ((slot >> self.fp_bits) & self.val_mask()) as u32;
        (fp, val)
    }

    fn slot_set(&self, table: &mut [u8], bucket: usize, way: usize, fp: u32, val: u32) {
        let bit = self.slot_bit(bucket, way);
        let slot = (fp as u64 & self.fp_mask()) | ((val as u64 & self.val_mask()) << self.fp_bits);
        write_bits(table, bit, self.slot_width(), slot);
    }

    /// Place in the first free slot of `bucket`, if any.
    fn bucket_insert(&self, table: &mut [u8], bucket: usize, fp: u32, val: u32) -> bool {
        for way in 0..CUCKOO_WAYS {
            let (slot_fp, _) = self.slot_get(table, bucket, way);
            if slot_fp == 0 {
                self.slot_set(table, bucket, way, fp, val);
                return true;
            }
        }
        false
    }

    /// Buckets of `bucket_count` filters are sized by the expected key
    /// count and load factor, always rounded up to a power of two.
    fn buckets_for(expected_keys: usize, frac: f64) -> usize {
        let raw = if frac > 0.0 {
            (expected_keys as f64 / CUCKOO_WAYS as f64 / frac).ceil() as usize
        } else {
            (expected_keys as f64 / CUCKOO_WAYS as f64).ceil() as usize
        };
        raw.max(1).next_power_of_two()
    }
}

/// A stranded item after an exhausted eviction chain.
struct Stuck {
    fp: u32,
    val: u32,
    /// One of the item's two valid buckets (where the chain left off).
    bucket: usize,
    /// `(bucket, way)` of every swap, for strict-mode undo.
    history: Vec<(usize, usize)>,
}

// ------------------------------------------------------------------------------------------------
// CuckooBlock
// ------------------------------------------------------------------------------------------------

/// Cuckoo filter builder. Created per directory from [`DirOptions`]
/// (`bf_bits_per_key` doubles as the fingerprint width) or explicitly
/// via [`with_value_bits`](Self::with_value_bits) for the tiny-hash-
/// table variant.
pub struct CuckooBlock {
    geo: Geometry,
    frac: f64,
    max_moves: usize,
    tables: Vec<Vec<u8>>,
    rng: SmallRng,
}

impl CuckooBlock {
    /// Fingerprint-only builder configured from `options`.
    pub fn new(options: &DirOptions) -> Self {
        Self::with_value_bits(options, options.bf_bits_per_key.clamp(1, 32) as u8, 0)
    }

    /// Builder with `fp_bits`-bit fingerprints and `val_bits`-bit slot
    /// values (`val_bits = 0` for plain membership).
    pub fn with_value_bits(options: &DirOptions, fp_bits: u8, val_bits: u8) -> Self {
        let mut block = Self {
            geo: Geometry {
                nbuckets: 1,
                fp_bits: fp_bits.clamp(1, 32),
                val_bits: val_bits.min(32),
            },
            frac: options.cuckoo_frac,
            max_moves: options.cuckoo_max_moves,
            tables: Vec::new(),
            rng: SmallRng::seed_from_u64(RNG_SEED),
        };
        FilterBuilder::reset(&mut block, 0);
        block
    }

    /// Run one insertion attempt (free slots, then the eviction chain)
    /// against the newest table.
    fn insert_chain(&mut self, fp: u32, val: u32, i1: usize, i2: usize) -> Result<(), Stuck> {
        let geo = self.geo;
        let rng = &mut self.rng;
        let table = self.tables.last_mut().expect("at least one table");

        if geo.bucket_insert(table, i1, fp, val) || geo.bucket_insert(table, i2, fp, val) {
            return Ok(());
        }

        let mut bucket = if rng.random::<bool>() { i1 } else { i2 };
        let (mut fp, mut val) = (fp, val);
        let mut history = Vec::new();

        for _ in 0..self.max_moves {
            let way = rng.random_range(0..CUCKOO_WAYS);
            let (victim_fp, victim_val) = geo.slot_get(table, bucket, way);
            geo.slot_set(table, bucket, way, fp, val);
            history.push((bucket, way));

            fp = victim_fp;
            val = victim_val;
            bucket = geo.alt_bucket(bucket, fp);
            if geo.bucket_insert(table, bucket, fp, val) {
                return Ok(());
            }
        }

        Err(Stuck {
            fp,
            val,
            bucket,
            history,
        })
    }

    /// Reverse a failed chain, restoring the table byte-for-byte.
    fn undo_chain(&mut self, stuck: Stuck) {
        let geo = self.geo;
        let table = self.tables.last_mut().expect("at least one table");
        let (mut fp, mut val) = (stuck.fp, stuck.val);
        for &(bucket, way) in stuck.history.iter().rev() {
            let (prev_fp, prev_val) = geo.slot_get(table, bucket, way);
            geo.slot_set(table, bucket, way, fp, val);
            fp = prev_fp;
            val = prev_val;
        }
    }

    fn key_geometry(&self, key: &[u8]) -> (u32, usize, usize) {
        let hash = xxh3_64(key);
        let fp = self.geo.fingerprint(hash);
        let i1 = self.geo.primary_bucket(hash);
        let i2 = self.geo.alt_bucket(i1, fp);
        (fp, i1, i2)
    }

    /// Insert `key` with a `val_bits`-wide payload, spilling to an
    /// auxiliary table when the newest table cannot absorb it.
    pub fn add(&mut self, key: &[u8], value: u32) {
        let (fp, i1, i2) = self.key_geometry(key);
        if let Err(stuck) = self.insert_chain(fp, value, i1, i2) {
            // The stranded fingerprint was evicted from one of its own
            // buckets, so parking it at the same bucket index in a
            // fresh table keeps it findable.
            let mut fresh = vec![0u8; self.geo.table_bytes()];
            self.geo
                .bucket_insert(&mut fresh, stuck.bucket, stuck.fp, stuck.val);
            self.tables.push(fresh);
        }
    }

    /// Strict insertion: `false` when the eviction chain is exhausted,
    /// leaving the table exactly as it was. The caller decides whether
    /// to stop filling the filter.
    pub fn test_add_key(&mut self, key: &[u8]) -> bool {
        let (fp, i1, i2) = self.key_geometry(key);
        match self.insert_chain(fp, 0, i1, i2) {
            Ok(()) => true,
            Err(stuck) => {
                self.undo_chain(stuck);
                false
            }
        }
    }

    /// Number of tables accumulated so far (> 1 once spilled).
    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }
}

impl FilterBuilder for CuckooBlock {
    fn reset(&mut self, expected_keys: usize) {
        self.geo.nbuckets = Geometry::buckets_for(expected_keys, self.frac);
        self.tables.clear();
        self.tables.push(vec![0u8; self.geo.table_bytes()]);
    }

    fn add_key(&mut self, key: &[u8]) {
        self.add(key, 0);
    }

    fn finish(&mut self) -> Vec<u8> {
        let table_bytes = self.geo.table_bytes();
        let mut blob = Vec::with_capacity(self.tables.len() * table_bytes + SUFFIX_LEN);
        for table in &self.tables {
            blob.extend_from_slice(table);
        }
        put_fixed32(&mut blob, self.tables.len() as u32);
        put_fixed32(&mut blob, self.geo.nbuckets as u32);
        blob.push(self.geo.fp_bits);
        blob.push(self.geo.val_bits);
        blob.push(if self.geo.val_bits > 0 {
            CUCKOO_VALUES_TAG
        } else {
            CUCKOO_PLAIN_TAG
        });

        self.tables.clear();
        self.tables.push(vec![0u8; table_bytes]);
        blob
    }
}

// ------------------------------------------------------------------------------------------------
// Matching
// ------------------------------------------------------------------------------------------------

/// Decode the blob suffix; `None` on any inconsistency.
fn parse_blob(blob: &[u8]) -> Option<(Geometry, usize, &[u8])> {
    if blob.len() < SUFFIX_LEN {
        return None;
    }
    let (tables_region, suffix) = blob.split_at(blob.len() - SUFFIX_LEN);

    let mut cursor = suffix;
    let num_tables = crate::coding::get_fixed32(&mut cursor).ok()? as usize;
    let nbuckets = crate::coding::get_fixed32(&mut cursor).ok()? as usize;
    let fp_bits = cursor[0];
    let val_bits = cursor[1];
    let tag = cursor[2];

    if !(1..=32).contains(&fp_bits)
        || val_bits > 32
        || nbuckets == 0
        || !nbuckets.is_power_of_two()
        || !(tag == CUCKOO_PLAIN_TAG || tag == CUCKOO_VALUES_TAG)
    {
        return None;
    }

    let geo = Geometry {
        nbuckets,
        fp_bits,
        val_bits,
    };
    if tables_region.len() != num_tables * geo.table_bytes() {
        return None;
    }
    Some((geo, num_tables, tables_region))
}

/// Scan all tables of `blob` for a slot matching `key`'s fingerprint.
///
/// Callbacks receive each matching slot's value; returning `true` stops
/// the scan.
fn scan_matches(key: &[u8], blob: &[u8], mut visit: impl FnMut(u32) -> bool) -> Option<()> {
    let (geo, num_tables, tables_region) = parse_blob(blob)?;
    let hash = xxh3_64(key);
    let fp = geo.fingerprint(hash);
    let i1 = geo.primary_bucket(hash);
    let i2 = geo.alt_bucket(i1, fp);

    let table_bytes = geo.table_bytes();
    for t in 0..num_tables {
        let table = &tables_region[t * table_bytes..(t + 1) * table_bytes];
        for bucket in [i1, i2] {
            for way in 0..CUCKOO_WAYS {
                let (slot_fp, slot_val) = geo.slot_get(table, bucket, way);
                if slot_fp == fp && visit(slot_val) {
                    return Some(());
                }
            }
            if i1 == i2 {
                break;
            }
        }
    }
    Some(())
}

/// Membership test against a finished cuckoo blob. Malformed blobs
/// answer "may match".
pub fn key_may_match(key: &[u8], blob: &[u8]) -> bool {
    let mut hit = false;
    match scan_matches(key, blob, |_| {
        hit = true;
        true
    }) {
        Some(()) => hit,
        None => true,
    }
}

/// All slot values whose fingerprint matches `key`, across every table.
///
/// The result is a **candidate set**: false matches are possible and
/// duplicates are not removed, so consumers must verify each candidate
/// against ground truth.
pub fn values(key: &[u8], blob: &[u8]) -> Vec<u32> {
    let mut out = Vec::new();
    scan_matches(key, blob, |val| {
        out.push(val);
        false
    });
    out
}
