//! Whole-run statistics over a list of snapshot headers.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::snapshot::model::{SnapshotCause, SnapshotHeader};

/// Summary of a run. Counters restart at the last suspected JVM reboot.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSummary {
    pub count: usize,
    pub full_gc_count: i64,
    pub young_gc_count: i64,
    pub latest_heap_usage: i64,
    pub latest_metaspace_usage: i64,
    pub total_gc_time_ms: i64,
    pub max_gc_time_ms: i64,
    pub max_snapshot_len: u64,
    pub max_entry_count: i64,
    /// Safepoint time since the last reboot; `None` unless every snapshot
    /// in that range carries it.
    pub safepoint_time_ms: Option<i64>,
    pub safepoint_percentage: Option<f64>,
    /// Capture times just before each suspected reboot.
    pub reboot_suspects: Vec<DateTime<Utc>>,
}

#[derive(Default)]
struct MaxStats {
    total_gc_time: i64,
    max_gc_time: i64,
    max_snapshot_len: u64,
    max_entry_count: i64,
}

impl MaxStats {
    fn accept(mut self, header: &SnapshotHeader) -> Self {
        self.total_gc_time += header.gc_time_ms;
        self.max_gc_time = self.max_gc_time.max(header.gc_time_ms);
        self.max_snapshot_len = self.max_snapshot_len.max(header.snapshot_len);
        self.max_entry_count = self.max_entry_count.max(header.num_entries);
        self
    }

    fn combine(self, other: Self) -> Self {
        Self {
            total_gc_time: self.total_gc_time + other.total_gc_time,
            max_gc_time: self.max_gc_time.max(other.max_gc_time),
            max_snapshot_len: self.max_snapshot_len.max(other.max_snapshot_len),
            max_entry_count: self.max_entry_count.max(other.max_entry_count),
        }
    }
}

impl SnapshotSummary {
    /// `headers` must be in capture order.
    pub fn from_headers(headers: &[SnapshotHeader]) -> Result<Self> {
        let (Some(first), Some(end)) = (headers.first(), headers.last()) else {
            return Err(Error::Precondition(
                "summary needs at least one snapshot".into(),
            ));
        };

        // Two GC snapshots in a row without a new full GC mean the counters reset.
        let mut reboot_suspects = Vec::new();
        let mut last_reboot = 0;
        for (idx, pair) in headers.windows(2).enumerate() {
            let (before, after) = (&pair[0], &pair[1]);
            if before.cause == SnapshotCause::Gc
                && after.cause == SnapshotCause::Gc
                && after.full_gc_count - before.full_gc_count <= 0
            {
                reboot_suspects.push(before.date());
                last_reboot = idx + 1;
            }
        }
        let start = headers.get(last_reboot).unwrap_or(first);

        let stats = headers
            .par_iter()
            .fold(MaxStats::default, MaxStats::accept)
            .reduce(MaxStats::default, MaxStats::combine);

        let since_reboot = &headers[last_reboot..];
        let (safepoint_time_ms, safepoint_percentage) =
            match (start.safepoint_time_ms, end.safepoint_time_ms) {
                (Some(s), Some(e)) if since_reboot.iter().all(|h| h.has_safepoint_time()) => {
                    let time = e - s;
                    let real_time = end.timestamp_ms - start.timestamp_ms;
                    let share = if real_time > 0 {
                        time as f64 / real_time as f64 * 100.0
                    } else {
                        0.0
                    };
                    (Some(time), Some(share))
                }
                _ => (None, None),
            };

        Ok(Self {
            count: headers.len(),
            full_gc_count: end.full_gc_count - start.full_gc_count + 1,
            young_gc_count: end.young_gc_count - start.young_gc_count + 1,
            latest_heap_usage: end.heap_usage(),
            latest_metaspace_usage: end.metaspace.map(|m| m.usage).unwrap_or(0),
            total_gc_time_ms: stats.total_gc_time,
            max_gc_time_ms: stats.max_gc_time,
            max_snapshot_len: stats.max_snapshot_len,
            max_entry_count: stats.max_entry_count,
            safepoint_time_ms,
            safepoint_percentage,
            reboot_suspects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::handler::scan_headers;
    use crate::snapshot::mock::{MockSnapshot, write_snapshots};
    use tempfile::tempdir;

    fn snapshot(ts: i64, full: i64, young: i64, gc_time: i64, safepoint: i64) -> MockSnapshot {
        let mut s = MockSnapshot::new(ts)
            .format(0x83)
            .class(1, "java/lang/String", 1, 24)
            .heap(100, 200);
        s.full_gc_count = full;
        s.young_gc_count = young;
        s.gc_time_ms = gc_time;
        s.safepoint_time_ms = safepoint;
        s
    }

    fn headers_of(snapshots: &[MockSnapshot]) -> Vec<SnapshotHeader> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.dat");
        write_snapshots(&path, snapshots);
        scan_headers(&path).unwrap()
    }

    #[test]
    fn test_summary_without_reboot() {
        let headers = headers_of(&[
            snapshot(1_000, 1, 5, 10, 100),
            snapshot(2_000, 2, 9, 30, 150),
            snapshot(11_000, 3, 12, 20, 1_100),
        ]);
        let summary = SnapshotSummary::from_headers(&headers).unwrap();

        assert_eq!(summary.count, 3);
        assert_eq!(summary.full_gc_count, 3);
        assert_eq!(summary.young_gc_count, 8);
        assert_eq!(summary.total_gc_time_ms, 60);
        assert_eq!(summary.max_gc_time_ms, 30);
        assert_eq!(summary.latest_heap_usage, 300);
        assert_eq!(summary.latest_metaspace_usage, 4096);
        assert_eq!(summary.max_entry_count, 1);
        assert_eq!(summary.max_snapshot_len, headers[0].snapshot_len);
        assert!(summary.reboot_suspects.is_empty());
        assert_eq!(summary.safepoint_time_ms, Some(1_000));
        let pct = summary.safepoint_percentage.unwrap();
        assert!((pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_reboot_restarts_counters() {
        let headers = headers_of(&[
            snapshot(1_000, 5, 50, 10, 500),
            snapshot(2_000, 6, 60, 10, 600),
            snapshot(3_000, 1, 2, 10, 10),
            snapshot(5_000, 2, 4, 10, 30),
        ]);
        let summary = SnapshotSummary::from_headers(&headers).unwrap();

        assert_eq!(summary.reboot_suspects, vec![headers[1].date()]);
        assert_eq!(summary.full_gc_count, 2);
        assert_eq!(summary.young_gc_count, 3);
        assert_eq!(summary.safepoint_time_ms, Some(20));
    }

    #[test]
    fn test_single_snapshot_has_no_nan() {
        let headers = headers_of(&[snapshot(1_000, 1, 1, 5, 250)]);
        let summary = SnapshotSummary::from_headers(&headers).unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.safepoint_time_ms, Some(0));
        assert_eq!(summary.safepoint_percentage, Some(0.0));
    }

    #[test]
    fn test_missing_safepoint_data() {
        let headers = headers_of(&[
            snapshot(1_000, 1, 1, 1, 0).format(0x81),
            snapshot(2_000, 2, 2, 1, 0),
        ]);
        let summary = SnapshotSummary::from_headers(&headers).unwrap();
        assert_eq!(summary.safepoint_time_ms, None);
        assert!(summary.safepoint_percentage.is_none());
    }

    #[test]
    fn test_empty_input_is_precondition() {
        assert!(matches!(
            SnapshotSummary::from_headers(&[]),
            Err(Error::Precondition(_))
        ));
    }
}
