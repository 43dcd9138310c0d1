//! Integration tests for the public `plfsio` API.
//!
//! These tests exercise the full write → finish → read pipeline
//! (buffers → compaction → blocks → filters → footer) through the
//! public `plfsio::{DirWriter, DirReader, DirOptions, LogSource}`
//! surface only. No internal modules are referenced.
//!
//! ## Coverage areas
//! - **Bloom effectiveness**: bulk load, bounded false-positive rate
//! - **Concurrency**: two producers, three buffers, two workers —
//!   every record retrievable afterwards
//! - **Rotation**: epoch rotation with continuous logical offsets
//! - **Cuckoo filters**: full round trip with spill-capable tables
//! - **Edge cases**: empty log, single record, value overwrite
//!
//! ## See also
//! - `writer::tests` — rotation/back-pressure/failure unit tests
//! - `reader::tests` — per-filter round trips and corruption handling
//! - `filter::tests` — filter-level false-negative guarantees

use plfsio::{Compression, DirOptions, DirReader, DirWriter, FilterType, LogSource};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Small write buffers to force frequent rotation and several blocks.
fn small_buffer_options() -> DirOptions {
    DirOptions {
        total_memtable_budget: 64 * 1024,
        num_bufs: 3,
        block_padding: false,
        ..DirOptions::default()
    }
}

/// Open a reader over the single-file log at `prefix`.
fn reopen(prefix: &std::path::Path, options: &DirOptions) -> DirReader {
    let source = LogSource::open(prefix, None).expect("open source");
    DirReader::open(source, options.clone()).expect("open reader")
}

// ================================================================================================
// Bloom effectiveness
// ================================================================================================

/// # Scenario
/// Load 65,536 fixed-width keys with 12 bloom bits per key, then probe
/// a disjoint 65,536-key range.
///
/// # Expected behavior
/// Every loaded key resolves; the false-positive rate of `get` over
/// the absent range stays at or below 2 %.
#[test]
fn bloom_false_positive_rate_bounded() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("bloom");
    let options = DirOptions {
        bf_bits_per_key: 12,
        ..DirOptions::default()
    };

    let writer = DirWriter::open(options.clone(), &prefix).unwrap();
    for i in 0..1u32 << 16 {
        writer.add(&i.to_le_bytes(), &[]).unwrap();
        if i == 1 << 15 {
            // Split the load across two blocks.
            writer.flush().unwrap();
        }
    }
    writer.finish().unwrap();

    let reader = reopen(&prefix, &options);
    assert!(reader.num_blocks() >= 2);

    for i in (0..1u32 << 16).step_by(97) {
        assert_eq!(
            reader.get(&i.to_le_bytes()).unwrap(),
            Some(Vec::new()),
            "loaded key {i} must resolve"
        );
    }

    // A `get` of an absent key only touches a block when a bloom
    // stripe false-positively admits it.
    let before = reader.stats();
    for i in (1u32 << 16)..(1u32 << 17) {
        assert_eq!(reader.get(&i.to_le_bytes()).unwrap(), None, "key {i}");
    }
    let after = reader.stats();
    let rate = (after.blocks_read - before.blocks_read) as f64 / (1u64 << 16) as f64;
    assert!(rate <= 0.02, "false-positive rate {rate} exceeds 2%");
}

// ================================================================================================
// Concurrency
// ================================================================================================

/// # Scenario
/// Two producer threads interleave 10,000 adds each on a writer with
/// three buffers and a two-worker compaction pool.
///
/// # Expected behavior
/// The finished log contains exactly those 20,000 records, each
/// retrievable via `get`.
#[test]
fn two_producers_all_records_retrievable() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("mp");
    let options = DirOptions {
        compaction_pool: Some(Arc::new(plfsio::env::ThreadPool::new(2))),
        ..small_buffer_options()
    };

    let writer = DirWriter::open(options.clone(), &prefix).unwrap();
    let handles: Vec<_> = (0..2u8)
        .map(|producer| {
            let writer = writer.clone();
            thread::spawn(move || {
                for i in 0..10_000u32 {
                    let key = [&[producer], i.to_le_bytes().as_slice()].concat();
                    let value = format!("p{producer}-{i}");
                    writer.add(&key, value.as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    writer.finish().unwrap();

    let reader = reopen(&prefix, &options);
    assert!(reader.num_blocks() > 1);

    for producer in 0..2u8 {
        for i in 0..10_000u32 {
            let key = [&[producer], i.to_le_bytes().as_slice()].concat();
            assert_eq!(
                reader.get(&key).unwrap(),
                Some(format!("p{producer}-{i}").into_bytes()),
                "producer {producer}, record {i}"
            );
        }
    }

    // A key neither producer wrote.
    let absent = [&[9u8], 0u32.to_le_bytes().as_slice()].concat();
    assert_eq!(reader.get(&absent).unwrap(), None);
}

// ================================================================================================
// Rotation
// ================================================================================================

/// # Scenario
/// Write an epoch, rotate the sink to index 7, write another epoch,
/// finish, and read through a rotation-aware source.
///
/// # Expected behavior
/// Both physical files are enumerated; the logical address space is
/// continuous, so every record from both epochs resolves.
#[test]
fn epoch_rotation_round_trip() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("epochs");
    let options = DirOptions {
        rotation: true,
        ..small_buffer_options()
    };

    let writer = DirWriter::open(options.clone(), &prefix).unwrap();
    for i in 0..1_000u32 {
        writer.add(&i.to_le_bytes(), b"epoch-0").unwrap();
    }
    writer.epoch_flush().unwrap();
    writer.rotate(7).unwrap();
    for i in 1_000..2_000u32 {
        writer.add(&i.to_le_bytes(), b"epoch-1").unwrap();
    }
    writer.finish().unwrap();

    let source = LogSource::open(&prefix, Some(7)).unwrap();
    assert_eq!(source.num_parts(), 2);
    let total = source.total_size();
    let reader = DirReader::open(source, options).unwrap();
    assert_eq!(reader.total_size(), total);

    for i in 0..1_000u32 {
        assert_eq!(reader.get(&i.to_le_bytes()).unwrap(), Some(b"epoch-0".to_vec()));
    }
    for i in 1_000..2_000u32 {
        assert_eq!(reader.get(&i.to_le_bytes()).unwrap(), Some(b"epoch-1".to_vec()));
    }
}

// ================================================================================================
// Cuckoo filters
// ================================================================================================

/// # Scenario
/// Full round trip with cuckoo filter stripes (16-bit fingerprints).
///
/// # Expected behavior
/// Every record resolves; a disjoint probe range is rejected at least
/// 99 % of the time without reading blocks incorrectly.
#[test]
fn cuckoo_round_trip() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("cuckoo");
    let options = DirOptions {
        filter: FilterType::Cuckoo,
        bf_bits_per_key: 16,
        ..small_buffer_options()
    };

    let writer = DirWriter::open(options.clone(), &prefix).unwrap();
    for i in 0..4_096u32 {
        writer.add(&i.to_le_bytes(), &i.to_le_bytes()).unwrap();
    }
    writer.finish().unwrap();

    let reader = reopen(&prefix, &options);
    for i in 0..4_096u32 {
        assert_eq!(
            reader.get(&i.to_le_bytes()).unwrap(),
            Some(i.to_le_bytes().to_vec())
        );
    }

    // Absent keys are rejected by the fingerprint tables ≥ 99 % of
    // the time; the few false positives still miss inside the block.
    let before = reader.stats();
    for i in 4_096..8_192u32 {
        assert_eq!(reader.get(&i.to_le_bytes()).unwrap(), None, "key {i}");
    }
    let after = reader.stats();
    let rate = (after.blocks_read - before.blocks_read) as f64 / 4_096.0;
    assert!(rate <= 0.01, "cuckoo false-positive rate {rate} exceeds 1%");
}

// ================================================================================================
// Edge cases
// ================================================================================================

/// A finished empty log still carries a footer and answers `None`.
#[test]
fn empty_log() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("empty");
    let options = DirOptions::default();

    let writer = DirWriter::open(options.clone(), &prefix).unwrap();
    writer.finish().unwrap();

    let reader = reopen(&prefix, &options);
    assert_eq!(reader.num_blocks(), 0);
    assert_eq!(reader.get(b"anything").unwrap(), None);
}

/// One record, default options (padding on, bloom on).
#[test]
fn single_record() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("one");
    let options = DirOptions::default();

    let writer = DirWriter::open(options.clone(), &prefix).unwrap();
    writer.add(b"lonely", b"record").unwrap();
    writer.finish().unwrap();

    let reader = reopen(&prefix, &options);
    assert_eq!(reader.num_blocks(), 1);
    assert_eq!(reader.get(b"lonely").unwrap(), Some(b"record".to_vec()));
    assert_eq!(reader.get(b"missing").unwrap(), None);
}

/// Overwrites across compressed blocks: the most recent add wins.
#[test]
fn overwrite_with_compression() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("overwrite");
    let options = DirOptions {
        compression: Compression::Snappy,
        ..small_buffer_options()
    };

    let writer = DirWriter::open(options.clone(), &prefix).unwrap();
    for generation in 0..3u32 {
        for i in 0..500u32 {
            let value = format!("gen{generation}-{i}");
            writer.add(&i.to_le_bytes(), value.as_bytes()).unwrap();
        }
        writer.flush().unwrap();
    }
    writer.finish().unwrap();

    let reader = reopen(&prefix, &options);
    for i in 0..500u32 {
        assert_eq!(
            reader.get(&i.to_le_bytes()).unwrap(),
            Some(format!("gen2-{i}").into_bytes()),
            "key {i} must read its newest generation"
        );
    }
}
