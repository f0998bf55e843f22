//! Parent/child queries over one snapshot's reference edges.
//!
//! Edges are only stored parent → child on disk. Parent queries go through a
//! reverse index built on first use and kept for the tracker's lifetime.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::analysis::ranking::{ClassFilter, RankMetric};
use crate::snapshot::{ObjectRecord, SnapshotBody};

/// Reverse edge: `parent` holds `instances`/`total_size` of the indexed child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ParentEdge {
    pub parent: i64,
    pub instances: i64,
    pub total_size: i64,
}

/// Child tag → referencing parents, each list sorted by parent tag.
pub type ReverseIndex = HashMap<i64, Vec<ParentEdge>>;

pub struct ReferenceTracker {
    body: Arc<SnapshotBody>,
    rank_level: Option<usize>,
    filter: Option<ClassFilter>,
    reverse: OnceLock<ReverseIndex>,
}

impl ReferenceTracker {
    pub fn new(body: Arc<SnapshotBody>) -> Self {
        Self {
            body,
            rank_level: None,
            filter: None,
            reverse: OnceLock::new(),
        }
    }

    /// Caps every `children`/`parents` answer, i.e. each traversal level.
    pub fn with_rank_level(mut self, rank_level: usize) -> Self {
        self.rank_level = Some(rank_level);
        self
    }

    pub fn with_filter(mut self, filter: ClassFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn body(&self) -> &SnapshotBody {
        &self.body
    }

    /// Classes referenced by `tag`, each carrying the edge's contribution.
    pub fn children(&self, tag: i64, metric: RankMetric) -> Vec<ObjectRecord> {
        let Some(edges) = self.body.get(tag).and_then(|r| r.references.as_ref()) else {
            return Vec::new();
        };

        let records = edges.iter().filter_map(|edge| match self.body.get(edge.tag) {
            Some(child) => self
                .accepts(child)
                .then(|| child.with_contribution(edge.instances, edge.total_size)),
            None => {
                debug!(parent = tag, child = edge.tag, "reference to a class missing from the snapshot");
                None
            }
        });
        self.rank(records, metric)
    }

    /// Classes referencing `tag`, each carrying its edge's contribution.
    pub fn parents(&self, tag: i64, metric: RankMetric) -> Vec<ObjectRecord> {
        let Some(edges) = self.reverse_index().get(&tag) else {
            return Vec::new();
        };

        let records = edges.iter().filter_map(|edge| {
            self.body
                .get(edge.parent)
                .filter(|parent| self.accepts(parent))
                .map(|parent| parent.with_contribution(edge.instances, edge.total_size))
        });
        self.rank(records, metric)
    }

    /// The reverse index, built on first call.
    pub fn reverse_index(&self) -> &ReverseIndex {
        self.reverse.get_or_init(|| build_reverse_index(&self.body))
    }

    /// The filter sees the class's own snapshot record, not the edge share.
    fn accepts(&self, record: &ObjectRecord) -> bool {
        self.filter.as_ref().is_none_or(|f| f(record))
    }

    fn rank(&self, records: impl Iterator<Item = ObjectRecord>, metric: RankMetric) -> Vec<ObjectRecord> {
        let mut ranked: Vec<ObjectRecord> = records.collect();
        ranked.sort_by(|a, b| metric.descending(a, b));
        if let Some(limit) = self.rank_level {
            ranked.truncate(limit);
        }
        ranked
    }
}

/// Builds the child → parents map from per-thread shards.
pub fn build_reverse_index(body: &SnapshotBody) -> ReverseIndex {
    let mut index = body
        .records
        .par_iter()
        .filter_map(|(&parent, record)| record.references.as_ref().map(|refs| (parent, refs)))
        .fold(ReverseIndex::new, |mut shard, (parent, refs)| {
            for edge in refs {
                shard.entry(edge.tag).or_default().push(ParentEdge {
                    parent,
                    instances: edge.instances,
                    total_size: edge.total_size,
                });
            }
            shard
        })
        .reduce(ReverseIndex::new, |mut merged, shard| {
            for (child, mut parents) in shard {
                merged.entry(child).or_default().append(&mut parents);
            }
            merged
        });

    // Shard order depends on scheduling.
    for parents in index.values_mut() {
        parents.sort_unstable_by_key(|p| (p.parent, p.instances, p.total_size));
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ChildEdge;

    fn record(tag: i64, name: &str, instances: i64, size: i64, refs: &[(i64, i64, i64)]) -> ObjectRecord {
        let mut o = ObjectRecord::new(tag, name, instances, size);
        o.references = Some(
            refs.iter()
                .map(|&(tag, instances, total_size)| ChildEdge {
                    tag,
                    instances,
                    total_size,
                })
                .collect(),
        );
        o
    }

    /// HashMap(1) → Node(2) ×40, String(3) ×10; Node(2) → String(3) ×30; String(3) → char[](4) ×40.
    fn graph() -> Arc<SnapshotBody> {
        Arc::new(
            [
                record(1, "java.util.HashMap", 1, 48, &[(2, 40, 1_280), (3, 10, 240)]),
                record(2, "java.util.HashMap$Node", 40, 1_280, &[(3, 30, 720)]),
                record(3, "java.lang.String", 40, 960, &[(4, 40, 2_400)]),
                record(4, "char []", 40, 2_400, &[]),
                ObjectRecord::new(5, "legacy.NoRefs", 1, 16),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn test_children_sorted_with_edge_contribution() {
        let tracker = ReferenceTracker::new(graph());
        let children = tracker.children(1, RankMetric::TotalSize);
        let tags: Vec<i64> = children.iter().map(|o| o.tag).collect();
        assert_eq!(tags, vec![2, 3]);
        assert_eq!(children[1].name, "java.lang.String");
        assert_eq!(children[1].instances, 10);
        assert_eq!(children[1].total_size, 240);
    }

    #[test]
    fn test_parents_through_reverse_index() {
        let tracker = ReferenceTracker::new(graph());
        let parents = tracker.parents(3, RankMetric::Instances);
        let tags: Vec<i64> = parents.iter().map(|o| o.tag).collect();
        assert_eq!(tags, vec![2, 1]);
        assert_eq!(parents[0].instances, 30);
        assert_eq!(parents[1].instances, 10);
        assert_eq!(parents[1].name, "java.util.HashMap");
    }

    #[test]
    fn test_rank_cap_per_call() {
        let tracker = ReferenceTracker::new(graph()).with_rank_level(1);
        assert_eq!(tracker.children(1, RankMetric::TotalSize).len(), 1);
        let parents = tracker.parents(3, RankMetric::TotalSize);
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].tag, 2);
        // The next level down gets its own cap.
        assert_eq!(tracker.children(parents[0].tag, RankMetric::TotalSize).len(), 1);
    }

    #[test]
    fn test_filter_applies_to_resolved_records() {
        let tracker = ReferenceTracker::new(graph())
            .with_filter(Arc::new(|o: &ObjectRecord| o.name.starts_with("java.lang")));
        let children = tracker.children(1, RankMetric::TotalSize);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].tag, 3);
    }

    #[test]
    fn test_filter_sees_class_totals_not_edge_share() {
        let tracker = ReferenceTracker::new(graph())
            .with_filter(Arc::new(|o: &ObjectRecord| o.total_size > 500));
        // String is 960 bytes overall but only 240 through HashMap.
        let children = tracker.children(1, RankMetric::TotalSize);
        let tags: Vec<i64> = children.iter().map(|o| o.tag).collect();
        assert_eq!(tags, vec![2, 3]);
        assert_eq!(children[1].total_size, 240);

        let tracker = ReferenceTracker::new(graph())
            .with_filter(Arc::new(|o: &ObjectRecord| o.instances >= 40));
        let parents = tracker.parents(3, RankMetric::Instances);
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].tag, 2);
        assert_eq!(parents[0].instances, 30);
    }

    #[test]
    fn test_missing_tags_yield_empty() {
        let tracker = ReferenceTracker::new(graph());
        assert!(tracker.children(0, RankMetric::TotalSize).is_empty());
        assert!(tracker.parents(0, RankMetric::TotalSize).is_empty());
        assert!(tracker.children(5, RankMetric::TotalSize).is_empty());
        assert!(tracker.parents(1, RankMetric::TotalSize).is_empty());
    }

    #[test]
    fn test_dangling_child_edge_skipped() {
        let body: SnapshotBody = [record(1, "a.A", 1, 16, &[(99, 1, 16), (1, 1, 16)])]
            .into_iter()
            .collect();
        let tracker = ReferenceTracker::new(Arc::new(body));
        let children = tracker.children(1, RankMetric::TotalSize);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].tag, 1);
    }

    #[test]
    fn test_reverse_index_is_idempotent() {
        let body = graph();
        let first = build_reverse_index(&body);
        let second = build_reverse_index(&body);
        assert_eq!(first, second);
        assert_eq!(
            first[&3],
            vec![
                ParentEdge {
                    parent: 1,
                    instances: 10,
                    total_size: 240
                },
                ParentEdge {
                    parent: 2,
                    instances: 30,
                    total_size: 720
                },
            ]
        );

        let tracker = ReferenceTracker::new(body);
        assert!(std::ptr::eq(tracker.reverse_index(), tracker.reverse_index()));
        assert_eq!(tracker.reverse_index(), &first);
    }
}
