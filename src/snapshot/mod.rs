//! Heap histogram snapshots: binary format, streaming parser and models.
//!
//! A snapshot file is scanned header-first ([`scan_headers`] or a
//! [`HeaderListSink`]); each [`SnapshotHeader`] then loads its per-class
//! body on demand through [`SnapshotHeader::body`].

pub mod cache;
pub mod class_name;
pub mod cursor;
pub mod format;
pub mod handler;
pub mod model;
pub mod parser;
pub mod summary;

#[cfg(test)]
pub(crate) mod mock;

pub use cache::BodyCache;
pub use cursor::{BinaryCursor, ByteOrder};
pub use format::{Capabilities, FormatVersion};
pub use handler::{HeaderListSink, SnapshotBodySink, load_body, scan_headers};
pub use model::{
    ChildEdge, MetaspaceUsage, OTHERS_TAG, ObjectRecord, SnapshotBody, SnapshotCause,
    SnapshotHeader,
};
pub use parser::{ParseOutcome, ParseResult, SnapshotParser, SnapshotSink};
pub use summary::SnapshotSummary;
