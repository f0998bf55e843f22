//! Snapshot analysis: top-N ranking, difference and reference graph.

pub mod ranking;
pub mod reference;

pub use ranking::{ClassDiff, ClassFilter, DiffCalculator, DiffReport, RankMetric, RankOptions};
pub use reference::{ParentEdge, ReferenceTracker, ReverseIndex, build_reverse_index};
