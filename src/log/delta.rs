//! Interval usage between consecutive log rows, and whole-range summary.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::log::record::{CpuTimes, LogRecord};

const MIB: f64 = 1024.0 * 1024.0;

/// Counter delta, `None` when the counter went backwards.
fn du64(curr: u64, prev: u64) -> Option<u64> {
    curr.checked_sub(prev)
}

fn di64(curr: i64, prev: i64) -> Option<i64> {
    (curr >= prev).then_some(curr - prev)
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// System CPU usage split, in percent of the interval's total ticks.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CpuUsage {
    pub user: f64,
    pub nice: f64,
    pub system: f64,
    pub idle: f64,
    pub iowait: f64,
    pub irq: f64,
    pub softirq: f64,
    pub steal: f64,
    pub guest: f64,
}

impl CpuUsage {
    /// Busy share: everything except idle.
    pub fn total(&self) -> f64 {
        self.user
            + self.nice
            + self.system
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
            + self.guest
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogDelta {
    pub date: DateTime<Utc>,
    pub timestamp_ms: i64,
    /// JVM user time share of the JVM's CPU time.
    pub java_user_usage: f64,
    pub java_sys_usage: f64,
    pub cpu: CpuUsage,
    pub sync_park: i64,
    pub safepoint_time_ms: i64,
    pub safepoints: i64,
    /// Some counter went backwards (JVM or host restart); all values are zero.
    pub minus_data: bool,
}

impl LogDelta {
    pub fn between(prev: &LogRecord, curr: &LogRecord) -> Self {
        let zeroed = Self {
            date: curr.date(),
            timestamp_ms: curr.timestamp_ms,
            java_user_usage: 0.0,
            java_sys_usage: 0.0,
            cpu: CpuUsage::default(),
            sync_park: 0,
            safepoint_time_ms: 0,
            safepoints: 0,
            minus_data: true,
        };

        let cpu = cpu_deltas(&curr.cpu, &prev.cpu);
        let jvm = (
            di64(curr.sync_park, prev.sync_park),
            di64(curr.safepoint_time_ms, prev.safepoint_time_ms),
            di64(curr.safepoints, prev.safepoints),
        );
        let (Some(cpu), (Some(sync_park), Some(safepoint_time_ms), Some(safepoints))) = (cpu, jvm)
        else {
            return zeroed;
        };

        let java_user = curr.java_user_time.saturating_sub(prev.java_user_time);
        let java_sys = curr.java_sys_time.saturating_sub(prev.java_sys_time);
        let java_total = java_user + java_sys;
        let cpu_total: u64 = cpu.iter().sum();
        let [user, nice, system, idle, iowait, irq, softirq, steal, guest] =
            cpu.map(|ticks| percent(ticks, cpu_total));

        Self {
            java_user_usage: percent(java_user, java_total),
            java_sys_usage: percent(java_sys, java_total),
            cpu: CpuUsage {
                user,
                nice,
                system,
                idle,
                iowait,
                irq,
                softirq,
                steal,
                guest,
            },
            sync_park,
            safepoint_time_ms,
            safepoints,
            minus_data: false,
            ..zeroed
        }
    }
}

fn cpu_deltas(curr: &CpuTimes, prev: &CpuTimes) -> Option<[u64; 9]> {
    let (curr, prev) = (curr.fields(), prev.fields());
    let mut out = [0u64; 9];
    for (slot, (c, p)) in out.iter_mut().zip(curr.into_iter().zip(prev)) {
        *slot = du64(c, p)?;
    }
    Some(out)
}

/// Deltas between every pair of consecutive rows; `records` must be time-ordered.
pub fn deltas(records: &[LogRecord]) -> Vec<LogDelta> {
    records
        .windows(2)
        .map(|pair| LogDelta::between(&pair[0], &pair[1]))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogSummary {
    pub average_cpu_usage: f64,
    pub max_cpu_usage: f64,
    pub average_vsz_mib: f64,
    pub max_vsz_mib: f64,
    pub average_rss_mib: f64,
    pub max_rss_mib: f64,
    pub average_live_threads: f64,
    pub max_live_threads: i64,
}

#[derive(Default)]
struct Totals {
    count: u64,
    vsz: u128,
    max_vsz: u64,
    rss: u128,
    max_rss: u64,
    live_threads: i128,
    max_live_threads: i64,
}

impl Totals {
    fn accept(mut self, record: &LogRecord) -> Self {
        self.count += 1;
        self.vsz += u128::from(record.vsz);
        self.max_vsz = self.max_vsz.max(record.vsz);
        self.rss += u128::from(record.rss);
        self.max_rss = self.max_rss.max(record.rss);
        self.live_threads += i128::from(record.live_threads);
        self.max_live_threads = self.max_live_threads.max(record.live_threads);
        self
    }

    fn combine(self, other: Self) -> Self {
        Self {
            count: self.count + other.count,
            vsz: self.vsz + other.vsz,
            max_vsz: self.max_vsz.max(other.max_vsz),
            rss: self.rss + other.rss,
            max_rss: self.max_rss.max(other.max_rss),
            live_threads: self.live_threads + other.live_threads,
            max_live_threads: self.max_live_threads.max(other.max_live_threads),
        }
    }
}

impl LogSummary {
    /// Returns `None` without any row.
    pub fn new(records: &[LogRecord], deltas: &[LogDelta]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        let (cpu_sum, cpu_max) = deltas
            .iter()
            .map(|d| d.cpu.total())
            .fold((0.0, 0.0f64), |(sum, max), usage| (sum + usage, max.max(usage)));
        let average_cpu_usage = if deltas.is_empty() {
            0.0
        } else {
            cpu_sum / deltas.len() as f64
        };

        let totals = records
            .par_iter()
            .fold(Totals::default, Totals::accept)
            .reduce(Totals::default, Totals::combine);
        let count = totals.count as f64;

        Some(Self {
            average_cpu_usage,
            max_cpu_usage: cpu_max,
            average_vsz_mib: totals.vsz as f64 / count / MIB,
            max_vsz_mib: totals.max_vsz as f64 / MIB,
            average_rss_mib: totals.rss as f64 / count / MIB,
            max_rss_mib: totals.max_rss as f64 / MIB,
            average_live_threads: totals.live_threads as f64 / count,
            max_live_threads: totals.max_live_threads,
        })
    }
}

/// Time-ordered rows with their interval deltas and range summary.
#[derive(Debug, Clone, Serialize)]
pub struct LogHistory {
    pub records: Vec<LogRecord>,
    pub deltas: Vec<LogDelta>,
    pub summary: Option<LogSummary>,
}

impl LogHistory {
    pub fn new(mut records: Vec<LogRecord>) -> Self {
        records.sort_by_key(|r| r.timestamp_ms);
        let deltas = deltas(&records);
        let summary = LogSummary::new(&records, &deltas);
        Self {
            records,
            deltas,
            summary,
        }
    }
}
