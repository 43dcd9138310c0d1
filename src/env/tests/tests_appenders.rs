//! Appender and decorator behavior.

#[cfg(test)]
mod tests {
    use crate::env::{Appender, BufferedAppender, CountingAppender, FileAppender, IoStats};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// # Scenario
    /// Append a few slices through a bare `FileAppender` and sync.
    ///
    /// # Expected behavior
    /// The file holds the exact concatenation.
    #[test]
    fn file_appender_writes_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.dat");

        let mut appender = FileAppender::create(&path).unwrap();
        appender.append(b"hello ").unwrap();
        appender.append(b"world").unwrap();
        appender.sync().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"hello world");
    }

    /// # Scenario
    /// Small appends through a `BufferedAppender` stay buffered until a
    /// flush pushes them down.
    ///
    /// # Expected behavior
    /// Before flush the file is empty; after flush it holds all bytes.
    #[test]
    fn buffered_appender_defers_until_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("b.dat");

        let inner = FileAppender::create(&path).unwrap();
        let mut buffered = BufferedAppender::new(Box::new(inner), 1024);

        buffered.append(b"abc").unwrap();
        buffered.append(b"def").unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), 0, "bytes still buffered");

        buffered.flush().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"abcdef");
    }

    /// # Scenario
    /// An append larger than the whole buffer bypasses it; a crossing
    /// append flushes the pending bytes first, preserving order.
    ///
    /// # Expected behavior
    /// File content equals append order regardless of the path taken.
    #[test]
    fn buffered_appender_large_write_preserves_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.dat");

        let inner = FileAppender::create(&path).unwrap();
        let mut buffered = BufferedAppender::new(Box::new(inner), 8);

        buffered.append(b"12").unwrap();
        let big = vec![b'x'; 32];
        buffered.append(&big).unwrap(); // bypasses the buffer
        buffered.append(b"34").unwrap();
        buffered.sync().unwrap();

        let mut expected = b"12".to_vec();
        expected.extend_from_slice(&big);
        expected.extend_from_slice(b"34");
        assert_eq!(fs::read(&path).unwrap(), expected);
    }

    /// # Scenario
    /// Route appends through a `CountingAppender` and inspect the shared
    /// statistics.
    ///
    /// # Expected behavior
    /// Byte, op, and sync counters reflect the calls made.
    #[test]
    fn counting_appender_tracks_stats() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("d.dat");

        let stats = Arc::new(IoStats::default());
        let inner = FileAppender::create(&path).unwrap();
        let mut counted = CountingAppender::new(Box::new(inner), Arc::clone(&stats));

        counted.append(b"12345").unwrap();
        counted.append(b"678").unwrap();
        counted.sync().unwrap();

        assert_eq!(stats.bytes_written(), 8);
        assert_eq!(stats.write_ops(), 2);
        assert_eq!(stats.syncs(), 1);
    }
}
