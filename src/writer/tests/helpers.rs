//! Shared helpers for writer tests.

use std::fs;
use std::io;
use std::path::Path;

use crate::coding::{BlockHandle, FOOTER_LEN, get_fixed64};
use crate::env::Appender;
use crate::options::DirOptions;
use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

pub fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::TRACE)
        .try_init();
}

/// Small buffers so a handful of records triggers rotation.
pub fn small_buffer_options() -> DirOptions {
    DirOptions {
        total_memtable_budget: 8 * 1024,
        num_bufs: 2,
        block_padding: false,
        ..DirOptions::default()
    }
}

/// An appender that admits the first `allow` appends and fails every
/// one after that. `flush`/`sync` keep succeeding so the failure is
/// isolated to the append path.
pub struct FailingAppender {
    appends: usize,
    allow: usize,
}

impl FailingAppender {
    pub fn new(allow: usize) -> Self {
        Self { appends: 0, allow }
    }
}

impl Appender for FailingAppender {
    fn append(&mut self, _data: &[u8]) -> io::Result<()> {
        if self.appends >= self.allow {
            return Err(io::Error::other("injected append failure"));
        }
        self.appends += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Decode the footer of a finished single-file log.
///
/// Returns `(filter_handle, index_handle)`.
pub fn read_footer(path: &Path) -> (BlockHandle, BlockHandle) {
    let bytes = fs::read(path).expect("read log file");
    assert!(bytes.len() >= FOOTER_LEN, "file shorter than a footer");
    let mut cursor = &bytes[bytes.len() - FOOTER_LEN..];
    let filter = BlockHandle::decode_from(&mut cursor).expect("filter handle");
    let index = BlockHandle::decode_from(&mut cursor).expect("index handle");
    (filter, index)
}

/// Decode the index stream of a finished single-file log into
/// `(filter_end, data_end)` pairs (sentinel included).
pub fn read_index_pairs(path: &Path) -> Vec<(u64, u64)> {
    let bytes = fs::read(path).expect("read log file");
    let (_, index_handle) = read_footer(path);

    let start = index_handle.offset as usize;
    let end = start + index_handle.size as usize;
    let mut cursor = &bytes[start..end];

    let mut pairs = Vec::new();
    while !cursor.is_empty() {
        let filter_end = get_fixed64(&mut cursor).expect("filter end");
        let data_end = get_fixed64(&mut cursor).expect("data end");
        pairs.push((filter_end, data_end));
    }
    pairs
}
