//! Compact, mmap-friendly storage for immutable triple snapshots.
//!
//! A snapshot file holds one sorted term dictionary and one SPO-ordered
//! triple block. Readers search any triple pattern through one of five
//! orderings (see [`TripleOrder`]) and jump straight to an offset inside the
//! matching run.
//!
//! Quick start: write a file
//!
//! ```no_run
//! use snapfile::{SnapshotWriter, WriterOptions};
//!
//! let mut w = SnapshotWriter::new("snapshot_0.snap", WriterOptions::default());
//! w.add("<http://example.org/Alice>", "<http://xmlns.com/foaf/0.1/name>", "\"Alice\"")
//!     .expect("add");
//! w.finalize().expect("write ok");
//! ```
//!
//! Read it back
//!
//! ```no_run
//! use snapfile::SnapshotFile;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let f = Arc::new(SnapshotFile::open(Path::new("snapshot_0.snap")).expect("open"));
//! for [s, p, o] in f.search([0, 0, 0]) {
//!     println!("{} {} {}", f.term(s).unwrap(), f.term(p).unwrap(), f.term(o).unwrap());
//! }
//! ```

pub mod header;
pub mod order;
pub mod reader;
pub mod writer;

pub use order::{TripleOrder, matches};
pub use reader::{SnapError, SnapshotFile, TripleIter};
pub use writer::{SnapshotWriter, WriterOptions, write_file};

/// Crate-level result type using the reader error.
pub type Result<T> = std::result::Result<T, crate::reader::SnapError>;
