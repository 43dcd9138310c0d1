//! Write → finish → read round trips through every filter and block
//! mode.

#[cfg(test)]
mod tests {
    use crate::log::LogSource;
    use crate::options::{DirOptions, FilterType};
    use crate::reader::DirReader;
    use crate::writer::DirWriter;
    use std::path::Path;
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    fn small_options() -> DirOptions {
        DirOptions {
            total_memtable_budget: 8 * 1024,
            num_bufs: 2,
            block_padding: false,
            ..DirOptions::default()
        }
    }

    /// Write `count` records under `prefix` and reopen for reading.
    fn write_and_open(prefix: &Path, options: &DirOptions, count: u32) -> DirReader {
        let writer = DirWriter::open(options.clone(), prefix).unwrap();
        for i in 0..count {
            writer
                .add(&i.to_le_bytes(), format!("value-{i}").as_bytes())
                .unwrap();
        }
        writer.finish().unwrap();

        let source = LogSource::open(prefix, None).unwrap();
        DirReader::open(source, options.clone()).unwrap()
    }

    /// # Scenario
    /// 3,000 records spanning many blocks, bloom filters on.
    ///
    /// # Expected behavior
    /// Every written key resolves to its value; absent keys return
    /// `None`.
    #[test]
    fn round_trip_with_bloom() {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let reader = write_and_open(&dir.path().join("log"), &small_options(), 3_000);
        assert!(reader.num_blocks() > 1, "expected a multi-block log");

        for i in 0..3_000u32 {
            assert_eq!(
                reader.get(&i.to_le_bytes()).unwrap(),
                Some(format!("value-{i}").into_bytes()),
                "key {i}"
            );
        }
        for i in 3_000..3_200u32 {
            assert_eq!(reader.get(&i.to_le_bytes()).unwrap(), None, "key {i}");
        }
    }

    /// Same round trip with filters disabled — every block is read.
    #[test]
    fn round_trip_without_filters() {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let options = DirOptions {
            filter: FilterType::NoFilter,
            ..small_options()
        };
        let reader = write_and_open(&dir.path().join("log"), &options, 500);

        for i in 0..500u32 {
            assert_eq!(
                reader.get(&i.to_le_bytes()).unwrap(),
                Some(format!("value-{i}").into_bytes())
            );
        }
        assert_eq!(reader.get(b"missing").unwrap(), None);
    }

    /// Same round trip through the cuckoo filter.
    #[test]
    fn round_trip_with_cuckoo() {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let options = DirOptions {
            filter: FilterType::Cuckoo,
            bf_bits_per_key: 16,
            ..small_options()
        };
        let reader = write_and_open(&dir.path().join("log"), &options, 1_000);

        for i in 0..1_000u32 {
            assert_eq!(
                reader.get(&i.to_le_bytes()).unwrap(),
                Some(format!("value-{i}").into_bytes())
            );
        }
    }

    /// Same round trip through the bitmap filter (4-byte LE keys fit
    /// its domain).
    #[test]
    fn round_trip_with_bitmap() {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let options = DirOptions {
            filter: FilterType::Bitmap,
            bm_key_bits: 16,
            ..small_options()
        };
        let reader = write_and_open(&dir.path().join("log"), &options, 800);

        for i in 0..800u32 {
            assert_eq!(
                reader.get(&i.to_le_bytes()).unwrap(),
                Some(format!("value-{i}").into_bytes())
            );
        }
        assert_eq!(reader.get(&9_999u32.to_le_bytes()).unwrap(), None);
    }

    /// Sorted (leveldb-compatible) block mode round trips as well.
    #[test]
    fn round_trip_leveldb_mode() {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let options = DirOptions {
            leveldb_compat: true,
            ..small_options()
        };
        let prefix = dir.path().join("sorted");
        let writer = DirWriter::open(options.clone(), &prefix).unwrap();
        for i in 0..1_000u32 {
            writer
                .add(format!("key-{i:06}").as_bytes(), format!("v{i}").as_bytes())
                .unwrap();
        }
        writer.finish().unwrap();

        let reader =
            DirReader::open(LogSource::open(&prefix, None).unwrap(), options).unwrap();
        for i in 0..1_000u32 {
            assert_eq!(
                reader.get(format!("key-{i:06}").as_bytes()).unwrap(),
                Some(format!("v{i}").into_bytes())
            );
        }
    }

    /// # Scenario
    /// The same key is overwritten within one buffer and again across
    /// buffers, in both block modes.
    ///
    /// # Expected behavior
    /// `get` returns the value of the most recent `add`.
    #[test]
    fn most_recent_add_wins() {
        init_tracing();

        for leveldb_compat in [false, true] {
            let dir = TempDir::new().unwrap();
            let options = DirOptions {
                leveldb_compat,
                ..small_options()
            };
            let prefix = dir.path().join("dups");
            let writer = DirWriter::open(options.clone(), &prefix).unwrap();

            // Same buffer: both versions land in one block.
            writer.add(b"city", b"karlsruhe").unwrap();
            writer.add(b"city", b"pittsburgh").unwrap();
            writer.flush().unwrap();

            // Later buffer: a newer block shadows the older one.
            writer.add(b"city", b"berkeley").unwrap();
            writer.flush().unwrap();
            writer.finish().unwrap();

            let reader =
                DirReader::open(LogSource::open(&prefix, None).unwrap(), options).unwrap();
            assert_eq!(
                reader.get(b"city").unwrap(),
                Some(b"berkeley".to_vec()),
                "leveldb_compat = {leveldb_compat}"
            );
        }
    }

    /// Empty keys and empty values are first-class records.
    #[test]
    fn empty_key_and_value_round_trip() {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let options = small_options();
        let prefix = dir.path().join("empties");
        let writer = DirWriter::open(options.clone(), &prefix).unwrap();
        writer.add(b"", b"empty key").unwrap();
        writer.add(b"empty value", b"").unwrap();
        writer.finish().unwrap();

        let reader = DirReader::open(LogSource::open(&prefix, None).unwrap(), options).unwrap();
        assert_eq!(reader.get(b"").unwrap(), Some(b"empty key".to_vec()));
        assert_eq!(reader.get(b"empty value").unwrap(), Some(Vec::new()));
    }

    /// # Scenario
    /// Finish a writer that never saw a record.
    ///
    /// # Expected behavior
    /// The reader opens (the footer exists) and every lookup returns
    /// `None`.
    #[test]
    fn empty_log_reads_not_found() {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let options = small_options();
        let prefix = dir.path().join("empty");
        let writer = DirWriter::open(options.clone(), &prefix).unwrap();
        writer.finish().unwrap();

        let reader = DirReader::open(LogSource::open(&prefix, None).unwrap(), options).unwrap();
        assert_eq!(reader.num_blocks(), 0);
        assert_eq!(reader.get(b"anything").unwrap(), None);
        assert_eq!(reader.get(b"").unwrap(), None);
    }

    /// # Scenario
    /// Write across a `rotate(7)` epoch boundary, then read through a
    /// rotation-aware source.
    ///
    /// # Expected behavior
    /// Records from both physical files resolve; logical offsets in
    /// the index remained continuous across the rotation.
    #[test]
    fn reads_across_rotation() {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let options = DirOptions {
            rotation: true,
            ..small_options()
        };
        let prefix = dir.path().join("rotated");
        let writer = DirWriter::open(options.clone(), &prefix).unwrap();

        for i in 0..200u32 {
            writer.add(&i.to_le_bytes(), b"before rotation").unwrap();
        }
        writer.rotate(7).unwrap();
        for i in 200..400u32 {
            writer.add(&i.to_le_bytes(), b"after rotation").unwrap();
        }
        writer.finish().unwrap();

        let source = LogSource::open(&prefix, Some(7)).unwrap();
        assert_eq!(source.num_parts(), 2);
        let reader = DirReader::open(source, options).unwrap();

        for i in 0..200u32 {
            assert_eq!(
                reader.get(&i.to_le_bytes()).unwrap(),
                Some(b"before rotation".to_vec()),
                "key {i}"
            );
        }
        for i in 200..400u32 {
            assert_eq!(
                reader.get(&i.to_le_bytes()).unwrap(),
                Some(b"after rotation".to_vec()),
                "key {i}"
            );
        }
    }

    /// Snappy-compressed blocks round trip transparently.
    #[test]
    fn round_trip_with_snappy() {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let options = DirOptions {
            compression: crate::options::Compression::Snappy,
            ..small_options()
        };
        let reader = write_and_open(&dir.path().join("snappy"), &options, 1_000);

        for i in 0..1_000u32 {
            assert_eq!(
                reader.get(&i.to_le_bytes()).unwrap(),
                Some(format!("value-{i}").into_bytes())
            );
        }
    }
}
