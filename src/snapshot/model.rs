//! Decoded snapshot records.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::snapshot::cache::BodyCache;
use crate::snapshot::cursor::ByteOrder;
use crate::snapshot::format::FormatVersion;

/// Tag of the synthetic "Others" record.
pub const OTHERS_TAG: i64 = 0;

/// Child tag that terminates a reference list on disk.
pub const CHILD_LIST_TERMINATOR: i64 = -1;

/// Why the agent took a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SnapshotCause {
    Gc,
    DataDumpRequest,
    Interval,
    Unknown,
}

impl SnapshotCause {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => SnapshotCause::Gc,
            2 => SnapshotCause::DataDumpRequest,
            3 => SnapshotCause::Interval,
            _ => SnapshotCause::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotCause::Gc => "GC",
            SnapshotCause::DataDumpRequest => "DataDumpRequest",
            SnapshotCause::Interval => "Interval",
            SnapshotCause::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for SnapshotCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metaspace (or PermGen) usage, absent in format 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetaspaceUsage {
    pub usage: i64,
    pub capacity: i64,
}

/// Metadata of one heap histogram.
///
/// Built once by a header scan; the per-class body is loaded lazily through
/// [`SnapshotHeader::body`](crate::snapshot::SnapshotHeader::body) and kept in
/// a reclaimable cache shared by all clones of this header.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotHeader {
    pub format: FormatVersion,
    pub byte_order: ByteOrder,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub num_entries: i64,
    /// Raw cause code as written by the agent.
    pub cause_code: i32,
    pub cause: SnapshotCause,
    /// GC cause text, `-` when the agent wrote none.
    pub gc_cause: String,
    pub full_gc_count: i64,
    pub young_gc_count: i64,
    pub gc_time_ms: i64,
    pub new_heap: i64,
    pub old_heap: i64,
    pub total_capacity: i64,
    pub metaspace: Option<MetaspaceUsage>,
    pub safepoint_time_ms: Option<i64>,

    /// Sum of instance counts over all entries, filled by the header scan.
    pub num_instances: i64,
    /// Sum of entry sizes over all entries, filled by the header scan.
    pub total_entry_size: i64,

    pub source: PathBuf,
    pub file_offset: u64,
    pub header_len: u64,
    /// Bytes from the header start to the end of the last entry.
    pub snapshot_len: u64,

    #[serde(skip)]
    pub(crate) cache: Arc<BodyCache>,
}

impl SnapshotHeader {
    pub fn date(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp_ms).unwrap_or_default()
    }

    /// Java heap usage (new + old generation).
    pub fn heap_usage(&self) -> i64 {
        self.new_heap + self.old_heap
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Offset of the first class entry.
    pub fn body_offset(&self) -> u64 {
        self.file_offset + self.header_len
    }

    pub fn has_reference_data(&self) -> bool {
        self.format.has_reference_data()
    }

    pub fn has_safepoint_time(&self) -> bool {
        self.format.has_safepoint_time()
    }

    pub fn body_cache(&self) -> &BodyCache {
        &self.cache
    }
}

impl std::fmt::Display for SnapshotHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SnapShot at {}, Cause {}, GC Caused by {}, Full GC {}, Young GC {}, GC Time at {}, \
             New Heap Usage {} byte, Old Heap Usage {} byte, Total Heap Size {} byte",
            self.date().format("%Y-%m-%d %H:%M:%S%.3f"),
            self.cause,
            self.gc_cause,
            self.full_gc_count,
            self.young_gc_count,
            self.gc_time_ms,
            self.new_heap,
            self.old_heap,
            self.total_capacity,
        )
    }
}

/// Forward reference edge: instances and bytes of `tag` held through one parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChildEdge {
    pub tag: i64,
    pub instances: i64,
    pub total_size: i64,
}

/// One class row of a snapshot. Equality and hashing use the tag only.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectRecord {
    pub tag: i64,
    pub name: String,
    pub class_loader_id: i64,
    pub class_loader_tag: i64,
    pub loader_name: String,
    pub instances: i64,
    pub total_size: i64,
    /// Forward edges; `None` when the format carries no reference data.
    pub references: Option<Vec<ChildEdge>>,
}

impl ObjectRecord {
    pub fn new(tag: i64, name: impl Into<String>, instances: i64, total_size: i64) -> Self {
        Self {
            tag,
            name: name.into(),
            class_loader_id: 0,
            class_loader_tag: 0,
            loader_name: String::new(),
            instances,
            total_size,
            references: None,
        }
    }

    /// Synthetic bucket for everything outside a top-N window.
    pub fn others(instances: i64, total_size: i64) -> Self {
        Self::new(OTHERS_TAG, "Others", instances, total_size)
    }

    pub fn is_others(&self) -> bool {
        self.tag == OTHERS_TAG
    }

    /// A zero-count copy used when a class disappeared between two snapshots.
    pub fn zeroed(&self) -> Self {
        Self {
            instances: 0,
            total_size: 0,
            references: None,
            ..self.clone()
        }
    }

    /// Copy of this record carrying another edge's contribution.
    pub fn with_contribution(&self, instances: i64, total_size: i64) -> Self {
        Self {
            instances,
            total_size,
            ..self.clone()
        }
    }

    /// Display name of this class's loader, given the name of the loader's
    /// class when it is present in the same snapshot.
    pub fn loader_display_name(&self, loader_class: Option<&str>) -> String {
        if self.class_loader_tag < 0 {
            "-".to_string()
        } else if self.class_loader_tag == 0 {
            "<SystemClassLoader>".to_string()
        } else {
            format!(
                "{} (0x{:x})",
                loader_class.unwrap_or("<Unknown>"),
                self.class_loader_id
            )
        }
    }
}

impl PartialEq for ObjectRecord {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
    }
}

impl Eq for ObjectRecord {}

impl Hash for ObjectRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag.hash(state);
    }
}

/// Fully materialized snapshot, keyed by tag.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotBody {
    pub records: HashMap<i64, ObjectRecord>,
}

impl SnapshotBody {
    pub fn get(&self, tag: i64) -> Option<&ObjectRecord> {
        self.records.get(&tag)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.records.values()
    }

    pub fn total_instances(&self) -> i64 {
        self.records.values().map(|o| o.instances).sum()
    }

    pub fn total_size(&self) -> i64 {
        self.records.values().map(|o| o.total_size).sum()
    }

    /// Fills every record's loader display name.
    pub fn resolve_loader_names(&mut self) {
        let names: HashMap<i64, String> = self
            .records
            .iter()
            .map(|(&tag, o)| (tag, o.name.clone()))
            .collect();
        for record in self.records.values_mut() {
            let loader_class = names.get(&record.class_loader_tag).map(String::as_str);
            record.loader_name = record.loader_display_name(loader_class);
        }
    }
}

impl FromIterator<ObjectRecord> for SnapshotBody {
    fn from_iter<I: IntoIterator<Item = ObjectRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().map(|o| (o.tag, o)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_identity_is_tag() {
        let a = ObjectRecord::new(7, "java.lang.String", 1, 16);
        let b = ObjectRecord::new(7, "something else", 99, 999);
        assert_eq!(a, b);
        assert_ne!(a, ObjectRecord::new(8, "java.lang.String", 1, 16));
    }

    #[test]
    fn test_loader_names() {
        let mut loader = ObjectRecord::new(5, "sun.misc.Launcher$AppClassLoader", 1, 64);
        loader.class_loader_tag = 0;
        let mut app = ObjectRecord::new(6, "com.example.App", 3, 48);
        app.class_loader_tag = 5;
        app.class_loader_id = 0x7f00;
        let mut orphan = ObjectRecord::new(7, "com.example.Orphan", 1, 16);
        orphan.class_loader_tag = 42;
        orphan.class_loader_id = 0x10;
        let mut bootstrap = ObjectRecord::new(8, "java.lang.Object", 1, 16);
        bootstrap.class_loader_tag = -1;

        let mut body: SnapshotBody = [loader, app, orphan, bootstrap].into_iter().collect();
        body.resolve_loader_names();

        assert_eq!(body.get(5).unwrap().loader_name, "<SystemClassLoader>");
        assert_eq!(
            body.get(6).unwrap().loader_name,
            "sun.misc.Launcher$AppClassLoader (0x7f00)"
        );
        assert_eq!(body.get(7).unwrap().loader_name, "<Unknown> (0x10)");
        assert_eq!(body.get(8).unwrap().loader_name, "-");
    }

    #[test]
    fn test_body_totals() {
        let body: SnapshotBody = [
            ObjectRecord::new(1, "a", 10, 100),
            ObjectRecord::new(2, "b", 5, 50),
        ]
        .into_iter()
        .collect();
        assert_eq!(body.total_instances(), 15);
        assert_eq!(body.total_size(), 150);
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn test_cause_codes() {
        assert_eq!(SnapshotCause::from_code(1), SnapshotCause::Gc);
        assert_eq!(SnapshotCause::from_code(2), SnapshotCause::DataDumpRequest);
        assert_eq!(SnapshotCause::from_code(3), SnapshotCause::Interval);
        assert_eq!(SnapshotCause::from_code(9).as_str(), "Unknown");
    }

    #[test]
    fn test_others_record() {
        let others = ObjectRecord::others(3, 30);
        assert!(others.is_others());
        assert_eq!(others.name, "Others");
    }
}
