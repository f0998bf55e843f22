//! Top-N class ranking per snapshot and the start→end difference.
//!
//! Ranking runs per snapshot in parallel; the difference step runs after all
//! rankings joined, because it needs the union of ranked tags.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::progress::{Progress, ProgressFn};
use crate::snapshot::{OTHERS_TAG, ObjectRecord, SnapshotHeader};

/// Class predicate applied before ranking.
pub type ClassFilter = Arc<dyn Fn(&ObjectRecord) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RankMetric {
    Instances,
    #[default]
    TotalSize,
}

impl RankMetric {
    pub fn of(self, record: &ObjectRecord) -> i64 {
        match self {
            RankMetric::Instances => record.instances,
            RankMetric::TotalSize => record.total_size,
        }
    }

    /// Descending by metric, ties by ascending tag.
    pub fn descending(self, a: &ObjectRecord, b: &ObjectRecord) -> Ordering {
        self.of(b).cmp(&self.of(a)).then(a.tag.cmp(&b.tag))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankOptions {
    pub rank_level: usize,
    pub include_others: bool,
    pub metric: RankMetric,
    /// Rank bodies decoded with display-style class names.
    pub java_style: bool,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            rank_level: 5,
            include_others: true,
            metric: RankMetric::TotalSize,
            java_style: true,
        }
    }
}

/// Change of one class between the first and last snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ClassDiff {
    pub tag: i64,
    pub date: DateTime<Utc>,
    pub class_name: String,
    pub loader_name: String,
    pub instances: i64,
    pub total_size: i64,
    /// Whether the class made some top-N window in the compared range.
    pub ranked: bool,
}

impl ClassDiff {
    /// `before` missing means the class did not exist yet.
    pub fn between(
        date: DateTime<Utc>,
        before: Option<&ObjectRecord>,
        after: &ObjectRecord,
        ranked: bool,
    ) -> Self {
        Self {
            tag: after.tag,
            date,
            class_name: after.name.clone(),
            loader_name: after.loader_name.clone(),
            instances: after.instances - before.map_or(0, |b| b.instances),
            total_size: after.total_size - before.map_or(0, |b| b.total_size),
            ranked,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffReport {
    /// Top-N list per snapshot, keyed by capture time in epoch millis.
    pub top_n: BTreeMap<i64, Vec<ObjectRecord>>,
    /// Tags seen in any top-N list, Others excluded.
    pub ranked_tags: BTreeSet<i64>,
    /// One entry per class of the last snapshot plus classes that vanished,
    /// largest change first.
    pub last_diff: Vec<ClassDiff>,
}

pub struct DiffCalculator {
    options: RankOptions,
    filter: Option<ClassFilter>,
    progress: Option<Arc<ProgressFn<'static>>>,
}

impl DiffCalculator {
    pub fn new(options: RankOptions) -> Self {
        Self {
            options,
            filter: None,
            progress: None,
        }
    }

    pub fn with_filter(mut self, filter: ClassFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Observer of `(snapshots ranked, snapshot count)`.
    pub fn with_progress(mut self, progress: Arc<ProgressFn<'static>>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn options(&self) -> &RankOptions {
        &self.options
    }

    fn accepts(&self, record: &ObjectRecord) -> bool {
        self.filter.as_ref().is_none_or(|f| f(record))
    }

    /// Top-N list of one snapshot, plus the Others bucket when enabled.
    ///
    /// Others is measured against the header's recorded totals: the instance
    /// total of the scan and the new + old heap usage.
    pub fn top_n(&self, header: &SnapshotHeader) -> Result<Vec<ObjectRecord>> {
        let body = header.body(self.options.java_style)?;
        let metric = self.options.metric;

        let mut ranked: Vec<&ObjectRecord> = body.values().filter(|o| self.accepts(o)).collect();
        ranked.sort_by(|a, b| metric.descending(a, b));
        ranked.truncate(self.options.rank_level);

        let mut list: Vec<ObjectRecord> = ranked.into_iter().cloned().collect();
        if self.options.include_others {
            let instances: i64 = list.iter().map(|o| o.instances).sum();
            let total_size: i64 = list.iter().map(|o| o.total_size).sum();
            list.push(ObjectRecord::others(
                header.num_instances - instances,
                header.heap_usage() - total_size,
            ));
        }
        Ok(list)
    }

    /// Top-N lists of every snapshot, keyed by capture time.
    pub fn rank_all(&self, headers: &[SnapshotHeader]) -> Result<BTreeMap<i64, Vec<ObjectRecord>>> {
        if headers.is_empty() {
            return Err(Error::Precondition(
                "ranking needs at least one snapshot".into(),
            ));
        }

        let progress = Progress::new(headers.len() as u64, self.progress.as_deref());
        headers
            .par_iter()
            .map(|header| -> Result<(i64, Vec<ObjectRecord>)> {
                let list = self.top_n(header)?;
                progress.advance(1);
                Ok((header.timestamp_ms, list))
            })
            .collect()
    }

    /// Ranks every snapshot and compares the first with the last.
    pub fn diff(&self, headers: &[SnapshotHeader]) -> Result<DiffReport> {
        let [start_header, .., end_header] = headers else {
            return Err(Error::Precondition(
                "difference needs at least two snapshots".into(),
            ));
        };

        let top_n = self.rank_all(headers)?;
        let ranked_tags: BTreeSet<i64> = top_n
            .values()
            .flatten()
            .map(|o| o.tag)
            .filter(|&tag| tag != OTHERS_TAG)
            .collect();

        let java_style = self.options.java_style;
        let start = start_header.body(java_style)?;
        let end = end_header.body(java_style)?;
        let date = end_header.date();

        let mut last_diff: Vec<ClassDiff> = end
            .values()
            .filter(|after| self.accepts(after))
            .map(|after| {
                ClassDiff::between(
                    date,
                    start.get(after.tag),
                    after,
                    ranked_tags.contains(&after.tag),
                )
            })
            .collect();

        // Classes gone by the end count as dropping to zero.
        for before in start.values().filter(|o| end.get(o.tag).is_none()) {
            let gone = before.zeroed();
            if self.accepts(&gone) {
                last_diff.push(ClassDiff::between(
                    date,
                    Some(before),
                    &gone,
                    ranked_tags.contains(&gone.tag),
                ));
            }
        }

        let metric = self.options.metric;
        let delta = |d: &ClassDiff| match metric {
            RankMetric::Instances => d.instances,
            RankMetric::TotalSize => d.total_size,
        };
        last_diff.sort_by(|a, b| delta(b).cmp(&delta(a)).then(a.tag.cmp(&b.tag)));

        debug!(
            snapshots = headers.len(),
            ranked = ranked_tags.len(),
            classes = last_diff.len(),
            "computed snapshot difference"
        );
        Ok(DiffReport {
            top_n,
            ranked_tags,
            last_diff,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::mock::{MockSnapshot, string_and_bytes, write_snapshots};
    use crate::snapshot::scan_headers;
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    fn headers_of(snapshots: &[MockSnapshot]) -> (TempDir, Vec<SnapshotHeader>) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.dat");
        write_snapshots(&path, snapshots);
        let headers = scan_headers(&path).unwrap();
        (dir, headers)
    }

    #[test]
    fn test_string_and_bytes_top_one_with_others() {
        let (_dir, headers) = headers_of(&[string_and_bytes(1000)]);
        let calc = DiffCalculator::new(RankOptions {
            rank_level: 1,
            ..RankOptions::default()
        });
        let list = calc.top_n(&headers[0]).unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "java.lang.String");
        assert_eq!(list[0].instances, 100);
        assert_eq!(list[0].total_size, 1_600_000);
        assert!(list[1].is_others());
        assert_eq!(list[1].instances, headers[0].num_instances - 100);
        assert_eq!(list[1].total_size, 800_000);
    }

    #[test]
    fn test_top_n_plus_others_equals_total() {
        let snapshot = MockSnapshot::new(5)
            .class(1, "a/A", 10, 500)
            .class(2, "b/B", 30, 100)
            .class(3, "c/C", 20, 300)
            .class(4, "d/D", 5, 900)
            .heap_from_classes();
        let (_dir, headers) = headers_of(&[snapshot]);

        for metric in [RankMetric::Instances, RankMetric::TotalSize] {
            let calc = DiffCalculator::new(RankOptions {
                rank_level: 2,
                metric,
                ..RankOptions::default()
            });
            let list = calc.top_n(&headers[0]).unwrap();
            assert_eq!(list.len(), 3);
            let instances: i64 = list.iter().map(|o| o.instances).sum();
            let size: i64 = list.iter().map(|o| o.total_size).sum();
            assert_eq!(instances, headers[0].num_instances);
            assert_eq!(size, headers[0].heap_usage());
        }
    }

    #[test]
    fn test_ranking_order_and_ties() {
        let snapshot = MockSnapshot::new(5)
            .class(9, "z/Z", 1, 100)
            .class(3, "y/Y", 1, 100)
            .class(5, "x/X", 1, 200);
        let (_dir, headers) = headers_of(&[snapshot]);
        let calc = DiffCalculator::new(RankOptions {
            rank_level: 3,
            include_others: false,
            ..RankOptions::default()
        });
        let tags: Vec<i64> = calc
            .top_n(&headers[0])
            .unwrap()
            .iter()
            .map(|o| o.tag)
            .collect();
        assert_eq!(tags, vec![5, 3, 9]);
    }

    #[test]
    fn test_filter_applies_before_cut() {
        let (_dir, headers) = headers_of(&[string_and_bytes(1)]);
        let calc = DiffCalculator::new(RankOptions {
            rank_level: 1,
            include_others: false,
            ..RankOptions::default()
        })
        .with_filter(Arc::new(|o: &ObjectRecord| o.name.ends_with("[]")));
        let list = calc.top_n(&headers[0]).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "byte []");
    }

    #[test]
    fn test_diff_between_first_and_last() {
        let (_dir, headers) = headers_of(&[
            MockSnapshot::new(1000)
                .class(1, "java/lang/String", 100, 1_600)
                .class(2, "[B", 50, 800)
                .class(3, "com/example/Gone", 4, 64)
                .heap_from_classes(),
            MockSnapshot::new(2000)
                .class(1, "java/lang/String", 150, 2_400)
                .class(2, "[B", 40, 640)
                .heap_from_classes(),
            MockSnapshot::new(3000)
                .class(1, "java/lang/String", 180, 2_880)
                .class(2, "[B", 45, 720)
                .class(4, "com/example/New", 7, 112)
                .heap_from_classes(),
        ]);

        let calc = DiffCalculator::new(RankOptions {
            rank_level: 1,
            ..RankOptions::default()
        });
        let report = calc.diff(&headers).unwrap();

        assert_eq!(report.top_n.len(), 3);
        assert_eq!(report.ranked_tags, BTreeSet::from([1]));

        let by_tag = |tag| report.last_diff.iter().find(|d| d.tag == tag).unwrap();
        assert_eq!(by_tag(1).instances, 80);
        assert_eq!(by_tag(1).total_size, 1_280);
        assert!(by_tag(1).ranked);
        assert_eq!(by_tag(2).instances, -5);
        assert!(!by_tag(2).ranked);
        assert_eq!(by_tag(4).instances, 7);
        assert_eq!(by_tag(3).instances, -4);
        assert_eq!(by_tag(3).total_size, -64);
        assert_eq!(by_tag(3).class_name, "com.example.Gone");
        assert_eq!(report.last_diff.len(), 4);
        assert_eq!(report.last_diff[0].tag, 1);
        assert_eq!(report.last_diff[0].date, headers[2].date());
    }

    #[test]
    fn test_progress_counts_snapshots() {
        let (_dir, headers) = headers_of(&[string_and_bytes(1), string_and_bytes(2)]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let calc = DiffCalculator::new(RankOptions::default()).with_progress(Arc::new(
            move |done: u64, total: u64| sink.lock().unwrap().push((done, total)),
        ));
        calc.diff(&headers).unwrap();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn test_preconditions() {
        let calc = DiffCalculator::new(RankOptions::default());
        assert!(matches!(calc.rank_all(&[]), Err(Error::Precondition(_))));
        assert!(matches!(calc.diff(&[]), Err(Error::Precondition(_))));

        let (_dir, headers) = headers_of(&[string_and_bytes(1)]);
        assert!(matches!(calc.diff(&headers), Err(Error::Precondition(_))));
        assert_eq!(calc.rank_all(&headers).unwrap().len(), 1);
    }
}
