//! Streaming decoder for heapstats snapshot files.
//!
//! File layout (all multi-byte fields in the order given by the second byte):
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ HEADER                                                       │
//! │   format: u8        0x31 | 0x3D | 0b1xxx_xxxx (extended)     │
//! │   byte_order: u8    'L' | 'B'                                │
//! │   timestamp: i64    epoch millis                             │
//! │   entries: i64                                               │
//! │   cause: i32                                                 │
//! │   gc_cause_len: i64, gc_cause: [u8; gc_cause_len]            │
//! │   full_gc, young_gc, gc_time, new_heap, old_heap,            │
//! │   total_capacity: i64 × 6                                    │
//! │   metaspace_usage, metaspace_capacity: i64 × 2  (not 0x31)   │
//! │   safepoint_time: i64                    (extended, 0x02)    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ ENTRY × entries                                              │
//! │   tag: i64, name_len: i64, name: [u8; name_len]              │
//! │   loader_id, loader_tag: i64 × 2                (not 0x31)   │
//! │   instances, total_size: i64 × 2                             │
//! │   (child_tag, instances, size): i64 × 3 … until tag == -1    │
//! │                                        (reference data only) │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//! A file is a plain concatenation of such snapshots.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, FormatError, Result};
use crate::snapshot::cache::BodyCache;
use crate::snapshot::class_name::to_display_name;
use crate::snapshot::cursor::{BinaryCursor, ByteOrder};
use crate::snapshot::format::FormatVersion;
use crate::snapshot::model::{
    CHILD_LIST_TERMINATOR, ChildEdge, MetaspaceUsage, ObjectRecord, SnapshotCause, SnapshotHeader,
};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Answer of a sink callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    Continue,
    Abort,
    Skip,
}

/// How a parse run ended when no decode error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseOutcome {
    Completed,
    Aborted,
    Skipped,
}

impl ParseResult {
    /// `None` to keep going, otherwise the outcome to report.
    fn stop(self) -> Option<ParseOutcome> {
        match self {
            ParseResult::Continue => None,
            ParseResult::Abort => Some(ParseOutcome::Aborted),
            ParseResult::Skip => Some(ParseOutcome::Skipped),
        }
    }
}

/// Receiver of parse events. Any non-`Continue` answer stops the file.
pub trait SnapshotSink {
    fn on_start(&mut self, _offset: u64) -> ParseResult {
        ParseResult::Continue
    }

    fn on_new_snapshot(&mut self, header: &SnapshotHeader) -> ParseResult;

    fn on_entry(&mut self, record: ObjectRecord) -> ParseResult;

    /// Only called when the header declares reference data.
    fn on_child_entry(&mut self, _parent_tag: i64, _edge: ChildEdge) -> ParseResult {
        ParseResult::Continue
    }

    fn on_finish(&mut self, _offset: u64) -> ParseResult {
        ParseResult::Continue
    }
}

macro_rules! proceed {
    ($result:expr) => {
        if let Some(outcome) = $result.stop() {
            return Ok(outcome);
        }
    };
}

/// Snapshot decoder. Cheap to construct; holds no per-file state.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotParser {
    java_style: bool,
}

impl SnapshotParser {
    /// `java_style` rewrites internal class names into display form.
    pub fn new(java_style: bool) -> Self {
        Self { java_style }
    }

    pub fn java_style(&self) -> bool {
        self.java_style
    }

    /// Decodes every snapshot in `path`, in file order.
    pub fn parse_file<S: SnapshotSink + ?Sized>(
        &self,
        path: &Path,
        sink: &mut S,
    ) -> Result<ParseOutcome> {
        let (reader, len) = open(path)?;
        let outcome = self.parse_reader(reader, len, path, sink)?;
        debug!(path = %path.display(), ?outcome, "parsed snapshot file");
        Ok(outcome)
    }

    /// Decodes the snapshots of an already-open source. `source` is recorded
    /// in each header so its body can be re-read later.
    pub fn parse_reader<R, S>(
        &self,
        reader: R,
        len: u64,
        source: &Path,
        sink: &mut S,
    ) -> Result<ParseOutcome>
    where
        R: Read + Seek,
        S: SnapshotSink + ?Sized,
    {
        let mut cursor = BinaryCursor::new(reader, len);
        self.parse_all(&mut cursor, source, sink)
            .map_err(|e| Error::format(source, e))
    }

    /// Decodes exactly one snapshot whose header was found by an earlier scan.
    pub fn parse_single<S: SnapshotSink + ?Sized>(
        &self,
        header: &SnapshotHeader,
        sink: &mut S,
    ) -> Result<ParseOutcome> {
        let path = header.source();
        let (reader, len) = open(path)?;
        let mut cursor = BinaryCursor::new(reader, len);
        self.parse_one(&mut cursor, header, sink)
            .map_err(|e| Error::format(path, e))
    }

    fn parse_all<R, S>(
        &self,
        cursor: &mut BinaryCursor<R>,
        source: &Path,
        sink: &mut S,
    ) -> std::result::Result<ParseOutcome, FormatError>
    where
        R: Read + Seek,
        S: SnapshotSink + ?Sized,
    {
        while let Some(header) = read_header(cursor, source)? {
            proceed!(sink.on_start(header.file_offset));
            proceed!(sink.on_new_snapshot(&header));
            proceed!(self.read_entries(cursor, &header, sink)?);
            proceed!(sink.on_finish(cursor.position()));
        }
        Ok(ParseOutcome::Completed)
    }

    fn parse_one<R, S>(
        &self,
        cursor: &mut BinaryCursor<R>,
        header: &SnapshotHeader,
        sink: &mut S,
    ) -> std::result::Result<ParseOutcome, FormatError>
    where
        R: Read + Seek,
        S: SnapshotSink + ?Sized,
    {
        cursor.seek_to(header.body_offset())?;
        cursor.set_order(header.byte_order);

        proceed!(sink.on_start(header.file_offset));
        proceed!(sink.on_new_snapshot(header));
        proceed!(self.read_entries(cursor, header, sink)?);
        proceed!(sink.on_finish(cursor.position()));
        Ok(ParseOutcome::Completed)
    }

    fn read_entries<R, S>(
        &self,
        cursor: &mut BinaryCursor<R>,
        header: &SnapshotHeader,
        sink: &mut S,
    ) -> std::result::Result<ParseResult, FormatError>
    where
        R: Read + Seek,
        S: SnapshotSink + ?Sized,
    {
        let format = header.format;

        for _ in 0..header.num_entries {
            let tag = cursor.read_i64("class tag")?;
            let name_len = cursor.read_i64("class name length")?;
            let name_bytes = cursor.read_block(name_len, "class name")?;
            let name = self.class_name(name_bytes, tag);

            let (class_loader_id, class_loader_tag) = if format.has_loader_info() {
                (
                    cursor.read_i64("class loader id")?,
                    cursor.read_i64("class loader tag")?,
                )
            } else {
                (0, 0)
            };

            let record = ObjectRecord {
                tag,
                name,
                class_loader_id,
                class_loader_tag,
                loader_name: String::new(),
                instances: cursor.read_i64("instance count")?,
                total_size: cursor.read_i64("total size")?,
                references: format.has_reference_data().then(Vec::new),
            };

            let mut result = sink.on_entry(record);
            if result == ParseResult::Continue && format.has_reference_data() {
                result = read_children(cursor, tag, sink)?;
            }
            if result != ParseResult::Continue {
                return Ok(result);
            }
        }

        Ok(ParseResult::Continue)
    }

    fn class_name(&self, bytes: Vec<u8>, tag: i64) -> String {
        let internal = String::from_utf8(bytes).unwrap_or_else(|e| {
            debug!(tag, "class name is not valid UTF-8");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        });
        if self.java_style {
            to_display_name(&internal)
        } else {
            internal
        }
    }
}

fn open(path: &Path) -> Result<(BufReader<File>, u64)> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let len = file.metadata().map_err(|e| Error::io(path, e))?.len();
    Ok((BufReader::with_capacity(READ_BUFFER_SIZE, file), len))
}

/// Reads one header; `None` at a clean end of file.
fn read_header<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    source: &Path,
) -> std::result::Result<Option<SnapshotHeader>, FormatError> {
    let start = cursor.position();

    let Some(raw) = cursor.try_read_u8()? else {
        return Ok(None);
    };
    let format = FormatVersion::from_byte(raw).ok_or(FormatError::UnknownVersion {
        value: raw,
        offset: start,
    })?;

    let mark = cursor.read_u8("byte order mark")?;
    let byte_order = ByteOrder::from_mark(mark).ok_or(FormatError::UnknownByteOrder {
        value: mark,
        offset: start + 1,
    })?;
    cursor.set_order(byte_order);

    let timestamp_ms = cursor.read_i64("snapshot date")?;
    let entries_offset = cursor.position();
    let num_entries = cursor.read_i64("entry count")?;
    if num_entries < 0 {
        return Err(FormatError::InvalidLength {
            what: "entry count",
            offset: entries_offset,
            length: num_entries,
        });
    }
    let cause_code = cursor.read_i32("snapshot cause")?;

    let gc_cause_len = cursor.read_i64("GC cause length")?;
    let gc_cause = decode_gc_cause(&cursor.read_block(gc_cause_len, "GC cause")?);

    let full_gc_count = cursor.read_i64("full GC count")?;
    let young_gc_count = cursor.read_i64("young GC count")?;
    let gc_time_ms = cursor.read_i64("GC time")?;
    let new_heap = cursor.read_i64("new heap size")?;
    let old_heap = cursor.read_i64("old heap size")?;
    let total_capacity = cursor.read_i64("total heap capacity")?;

    let metaspace = if format.has_metaspace() {
        Some(MetaspaceUsage {
            usage: cursor.read_i64("metaspace usage")?,
            capacity: cursor.read_i64("metaspace capacity")?,
        })
    } else {
        None
    };

    let safepoint_time_ms = if format.has_safepoint_time() {
        Some(cursor.read_i64("safepoint time")?)
    } else {
        None
    };

    Ok(Some(SnapshotHeader {
        format,
        byte_order,
        timestamp_ms,
        num_entries,
        cause_code,
        cause: SnapshotCause::from_code(cause_code),
        gc_cause,
        full_gc_count,
        young_gc_count,
        gc_time_ms,
        new_heap,
        old_heap,
        total_capacity,
        metaspace,
        safepoint_time_ms,
        num_instances: 0,
        total_entry_size: 0,
        source: source.to_path_buf(),
        file_offset: start,
        header_len: cursor.position() - start,
        snapshot_len: 0,
        cache: Arc::new(BodyCache::new()),
    }))
}

fn read_children<R, S>(
    cursor: &mut BinaryCursor<R>,
    parent_tag: i64,
    sink: &mut S,
) -> std::result::Result<ParseResult, FormatError>
where
    R: Read + Seek,
    S: SnapshotSink + ?Sized,
{
    let mut triple = [0u8; 24];
    loop {
        cursor.read_exact(&mut triple, "child class entry")?;
        let order = cursor.order();
        let tag = order.word(&triple, 0);
        if tag == CHILD_LIST_TERMINATOR {
            return Ok(ParseResult::Continue);
        }
        let edge = ChildEdge {
            tag,
            instances: order.word(&triple, 1),
            total_size: order.word(&triple, 2),
        };
        let result = sink.on_child_entry(parent_tag, edge);
        if result != ParseResult::Continue {
            return Ok(result);
        }
    }
}

fn decode_gc_cause(bytes: &[u8]) -> String {
    match bytes.first() {
        None | Some(0) => "-".to_string(),
        Some(_) => {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        }
    }
}
