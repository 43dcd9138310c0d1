//! Sink lifecycle: append, offsets, close semantics, io stats.

#[cfg(test)]
mod tests {
    use crate::log::{LogError, LogOptions, LogSink, LogSource};
    use std::fs;
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    /// # Scenario
    /// Append a few buffers, sync, and read the file back.
    ///
    /// # Expected behavior
    /// `<prefix>.dat` holds the exact concatenation; `ltell` equals the
    /// byte count.
    #[test]
    fn append_and_tell() {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("log");

        let sink = LogSink::open(&LogOptions::default(), &prefix).unwrap();
        assert_eq!(sink.ltell(), 0);

        sink.append(b"alpha").unwrap();
        sink.append(b"beta").unwrap();
        assert_eq!(sink.ltell(), 9);
        assert_eq!(sink.ptell(), 9);

        sink.sync().unwrap();
        let bytes = fs::read(dir.path().join("log.dat")).unwrap();
        assert_eq!(bytes, b"alphabeta");
    }

    /// # Scenario
    /// Close the sink, then attempt further operations.
    ///
    /// # Expected behavior
    /// `append` and `sync` fail with `Disconnected`; a second `close`
    /// is an error-free no-op.
    #[test]
    fn closed_sink_disconnects() {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let sink = LogSink::open(&LogOptions::default(), dir.path().join("log")).unwrap();

        sink.append(b"x").unwrap();
        sink.close(true).unwrap();

        assert!(matches!(sink.append(b"y"), Err(LogError::Disconnected)));
        assert!(matches!(sink.sync(), Err(LogError::Disconnected)));
        sink.close(false).unwrap(); // idempotent
    }

    /// # Scenario
    /// Clone the handle, append through both clones, drop one.
    ///
    /// # Expected behavior
    /// Clones share one stream and one offset; dropping a clone does
    /// not disturb the survivor.
    #[test]
    fn clones_share_one_stream() {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let sink = LogSink::open(&LogOptions::default(), dir.path().join("log")).unwrap();
        let other = sink.clone();

        sink.append(b"one").unwrap();
        other.append(b"two").unwrap();
        drop(other);

        sink.append(b"three").unwrap();
        assert_eq!(sink.ltell(), 11);

        sink.sync().unwrap();
        let bytes = fs::read(dir.path().join("log.dat")).unwrap();
        assert_eq!(bytes, b"onetwothree");
    }

    /// # Scenario
    /// Open with io-stats counting and a tiny write buffer, push bytes
    /// through, then sync.
    ///
    /// # Expected behavior
    /// `io_stats` reports every byte and at least one sync.
    #[test]
    fn io_stats_count_appends() {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let options = LogOptions {
            max_buf: 8,
            io_stats: true,
            ..LogOptions::default()
        };
        let sink = LogSink::open(&options, dir.path().join("log")).unwrap();

        for _ in 0..10 {
            sink.append(b"0123456789").unwrap();
        }
        sink.sync().unwrap();

        let stats = sink.io_stats().expect("stats enabled");
        assert_eq!(stats.bytes_written(), 100);
        assert!(stats.syncs() >= 1);
    }

    /// # Scenario
    /// Write through a sink, drop every handle, then read via
    /// `LogSource`.
    ///
    /// # Expected behavior
    /// The source sees all bytes; `total_size` matches `ltell` at drop.
    #[test]
    fn source_reads_back_sink_output() {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("log");

        let sink = LogSink::open(&LogOptions::default(), &prefix).unwrap();
        sink.append(b"hello, source").unwrap();
        let written = sink.ltell();
        drop(sink); // flushes and syncs

        let source = LogSource::open(&prefix, None).unwrap();
        assert_eq!(source.total_size(), written);

        let mut buf = vec![0u8; written as usize];
        source.read_exact_at(&mut buf, 0).unwrap();
        assert_eq!(buf, b"hello, source");

        let mut tail = [0u8; 6];
        source.read_exact_at(&mut tail, written - 6).unwrap();
        assert_eq!(&tail, b"source");

        assert!(source.read_exact_at(&mut tail, written).is_err());
    }
}
