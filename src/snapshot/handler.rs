//! Stock sinks: header-only scanning and full body materialization.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::snapshot::model::{ChildEdge, ObjectRecord, SnapshotBody, SnapshotHeader};
use crate::snapshot::parser::{ParseResult, SnapshotParser, SnapshotSink};

/// Upper bound on the up-front map reservation; entry counts come from disk.
const MAX_RESERVE: usize = 1 << 16;

/// Collects headers, filling the totals the header itself does not carry.
///
/// A header is only reported once its `on_finish` was seen, so a file that
/// fails halfway never yields a header with partial totals.
#[derive(Default)]
pub struct HeaderListSink<'a> {
    headers: Vec<SnapshotHeader>,
    finished: usize,
    instances: i64,
    total_size: i64,
    progress: Option<Box<dyn FnMut(u64) + 'a>>,
}

impl<'a> HeaderListSink<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `progress` receives the byte length of each finished snapshot.
    pub fn with_progress(progress: impl FnMut(u64) + 'a) -> Self {
        Self {
            progress: Some(Box::new(progress)),
            ..Self::default()
        }
    }

    /// Headers whose snapshot was decoded to the end.
    pub fn headers(&self) -> &[SnapshotHeader] {
        &self.headers[..self.finished]
    }

    pub fn into_headers(mut self) -> Vec<SnapshotHeader> {
        self.headers.truncate(self.finished);
        self.headers
    }
}

impl SnapshotSink for HeaderListSink<'_> {
    fn on_start(&mut self, _offset: u64) -> ParseResult {
        self.instances = 0;
        self.total_size = 0;
        ParseResult::Continue
    }

    fn on_new_snapshot(&mut self, header: &SnapshotHeader) -> ParseResult {
        self.headers.push(header.clone());
        ParseResult::Continue
    }

    fn on_entry(&mut self, record: ObjectRecord) -> ParseResult {
        self.instances += record.instances;
        self.total_size += record.total_size;
        ParseResult::Continue
    }

    fn on_finish(&mut self, offset: u64) -> ParseResult {
        let finished = self.headers.len();
        let Some(current) = self.headers.last_mut() else {
            return ParseResult::Continue;
        };
        current.num_instances = self.instances;
        current.total_entry_size = self.total_size;
        current.snapshot_len = offset - current.file_offset;
        let len = current.snapshot_len;
        self.finished = finished;

        if let Some(progress) = self.progress.as_mut() {
            progress(len);
        }
        ParseResult::Continue
    }
}

/// Materializes one snapshot into a tag-keyed map.
#[derive(Debug, Default)]
pub struct SnapshotBodySink {
    records: HashMap<i64, ObjectRecord>,
    orphan_edges: usize,
}

impl SnapshotBodySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finishes the body; loader display names are resolved here.
    pub fn into_body(self) -> SnapshotBody {
        let mut body = SnapshotBody {
            records: self.records,
        };
        body.resolve_loader_names();
        body
    }
}

impl SnapshotSink for SnapshotBodySink {
    fn on_new_snapshot(&mut self, header: &SnapshotHeader) -> ParseResult {
        self.records = HashMap::with_capacity((header.num_entries as usize).min(MAX_RESERVE));
        ParseResult::Continue
    }

    fn on_entry(&mut self, record: ObjectRecord) -> ParseResult {
        self.records.insert(record.tag, record);
        ParseResult::Continue
    }

    fn on_child_entry(&mut self, parent_tag: i64, edge: ChildEdge) -> ParseResult {
        match self.records.get_mut(&parent_tag) {
            Some(parent) => parent.references.get_or_insert_with(Vec::new).push(edge),
            None => self.orphan_edges += 1,
        }
        ParseResult::Continue
    }

    fn on_finish(&mut self, _offset: u64) -> ParseResult {
        if self.orphan_edges > 0 {
            debug!(edges = self.orphan_edges, "dropped reference edges without a parent entry");
        }
        ParseResult::Continue
    }
}

impl SnapshotHeader {
    /// Returns this snapshot's body, decoding it from the source file on a
    /// cache miss. Clones of a header share one cached body.
    pub fn body(&self, java_style: bool) -> Result<Arc<SnapshotBody>> {
        self.cache
            .get_or_load(java_style, || load_body(self, java_style))
    }

    /// Drops the cached body, if any.
    pub fn release_body(&self) -> bool {
        self.cache.release()
    }
}

/// Decodes a body without touching the header's cache.
pub fn load_body(header: &SnapshotHeader, java_style: bool) -> Result<SnapshotBody> {
    let mut sink = SnapshotBodySink::new();
    SnapshotParser::new(java_style).parse_single(header, &mut sink)?;
    let body = sink.into_body();
    debug!(
        path = %header.source().display(),
        offset = header.file_offset,
        entries = body.len(),
        "loaded snapshot body"
    );
    Ok(body)
}

/// Scans every header in one file, in file order.
pub fn scan_headers(path: &Path) -> Result<Vec<SnapshotHeader>> {
    let mut sink = HeaderListSink::new();
    SnapshotParser::new(false).parse_file(path, &mut sink)?;
    Ok(sink.into_headers())
}
