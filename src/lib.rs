//! # plfsio
//!
//! An embeddable, **log-structured**, **partitioned indexed** directory
//! engine for write-optimized key/value workloads. Designed for bursty
//! multi-producer ingestion with single-key point lookups and no
//! read-side scans of the data log.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        DirWriter                           │
//! │  ┌────────────┐   rotate   ┌────────────┐   compact        │
//! │  │  Active     │ ─────────► │ Immutable  │ ──────────┐      │
//! │  │  MemBuffer  │            │ MemBuffers │  (ticket) │      │
//! │  └────────────┘            └────────────┘           ▼      │
//! │                                          ┌──────────────┐  │
//! │   filter stream ◄────────────────────────│ block + CRC  │  │
//! │   index stream  ◄────────────────────────│ filter stripe│  │
//! │                                          └──────┬───────┘  │
//! │                                                 ▼          │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │ LogSink — append-only, rotated, buffered, counted    │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//!
//!          blocks ‖ filter stream ‖ index stream ‖ footer
//!
//! ┌────────────────────────────────────────────────────────────┐
//! │  DirReader — footer → filter/index cache → filtered get    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`options`] | Engine configuration — buffers, blocks, filters, compression |
//! | [`coding`] | Fixed/varint wire primitives and block handles |
//! | [`env`] | File capability traits, decorators, and the worker pool |
//! | [`log`] | Append-only log sink/source with rotation-stable offsets |
//! | [`block`] | Self-describing data blocks with a checksummed trailer |
//! | [`filter`] | Bloom, bitmap, and cuckoo point-membership filters |
//! | [`writer`] | Double-buffered, ticket-ordered compaction pipeline |
//! | [`reader`] | Footer-driven point-lookup path |
//!
//! ## Key Features
//!
//! - **Double-buffered ingestion** — foreground adds fill one buffer
//!   while background workers drain the others; a ticket barrier keeps
//!   on-disk block order equal to rotation order.
//! - **Self-describing log** — every block carries a compression tag and
//!   a masked CRC32C trailer; the footer makes one file (or a rotated
//!   family of files) fully self-locating.
//! - **Point-lookup filters** — per-block bloom, bitmap, or cuckoo
//!   stripes answer `get` without touching non-matching blocks.
//! - **Rotation-stable addressing** — index entries use logical offsets
//!   that never jump across physical-file rotation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plfsio::{DirOptions, DirReader, DirWriter, LogSource};
//!
//! let opts = DirOptions::default();
//! let writer = DirWriter::open(opts.clone(), "/tmp/plfs/epoch-0").unwrap();
//!
//! writer.add(b"key", b"value").unwrap();
//! writer.finish().unwrap();
//!
//! let source = LogSource::open("/tmp/plfs/epoch-0", None).unwrap();
//! let reader = DirReader::open(source, opts).unwrap();
//! assert_eq!(reader.get(b"key").unwrap(), Some(b"value".to_vec()));
//! ```

pub mod block;
pub mod coding;
pub mod env;
pub mod filter;
pub mod log;
pub mod options;
pub mod reader;
pub mod writer;

pub use log::{LogSink, LogSource};
pub use options::{Compression, DirOptions, FilterType};
pub use reader::DirReader;
pub use writer::DirWriter;
