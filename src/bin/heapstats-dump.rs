//! heapstats-dump - inspect HeapStats agent output from the command line.
//!
//! Reads heap snapshot files, thread recorder dumps and resource logs and
//! prints either a human-readable report or JSON.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use heapstats::analysis::{
    ClassFilter, DiffCalculator, DiffReport, RankMetric, RankOptions, ReferenceTracker,
};
use heapstats::log::LogHistory;
use heapstats::progress::ProgressFn;
use heapstats::provider::{
    ParseMode, ParseOptions, ParseReport, parse_log_files, parse_thread_record,
    scan_snapshot_files,
};
use heapstats::snapshot::{ObjectRecord, SnapshotHeader, SnapshotSummary};
use heapstats::threadrecord::{ThreadEvent, ThreadRecordOptions, ThreadRecording};
use heapstats::{Error, Result};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "heapstats-dump", about = "Inspect HeapStats agent output files")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Keep whatever decoded before a broken file instead of failing
    #[arg(long, global = true)]
    best_effort: bool,

    /// Parse files one at a time
    #[arg(long, global = true)]
    sequential: bool,

    /// Report parse progress on stderr
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List snapshots with GC and heap figures, plus a run summary
    Snapshots { files: Vec<PathBuf> },

    /// Top-N classes per snapshot and the first-to-last difference
    Rank {
        files: Vec<PathBuf>,

        /// Classes kept per snapshot
        #[arg(long, default_value_t = 5)]
        rank: usize,

        /// Rank by instance count instead of total size
        #[arg(long)]
        by_instances: bool,

        /// Do not fold the remaining classes into an "Others" row
        #[arg(long)]
        no_others: bool,

        /// Keep raw JVM class names
        #[arg(long)]
        raw_names: bool,

        /// Only classes whose name contains this text
        #[arg(long)]
        filter: Option<String>,
    },

    /// Children or parents of one class in one snapshot
    Refs {
        file: PathBuf,

        /// Class tag to start from
        #[arg(long)]
        tag: i64,

        /// Snapshot position in time order; the last one by default
        #[arg(long)]
        index: Option<usize>,

        /// Show referrers instead of referents
        #[arg(long)]
        parents: bool,

        /// Entries kept per level
        #[arg(long, default_value_t = 10)]
        rank: usize,

        /// Rank by instance count instead of total size
        #[arg(long)]
        by_instances: bool,
    },

    /// Thread recorder timeline
    Threads {
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = EventKind::All)]
        events: EventKind,
    },

    /// Resource log usage per interval
    Log { files: Vec<PathBuf> },
}

#[derive(Clone, Copy, ValueEnum)]
enum EventKind {
    All,
    Suspend,
    Lock,
    Io,
}

impl EventKind {
    fn accepts(self, event: ThreadEvent) -> bool {
        match self {
            EventKind::All => true,
            EventKind::Suspend => event.is_suspend(),
            EventKind::Lock => event.is_lock(),
            EventKind::Io => event.is_io(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("heapstats={level},heapstats_dump={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let options = ParseOptions {
        mode: if cli.best_effort {
            ParseMode::BestEffort
        } else {
            ParseMode::Strict
        },
        parallel: !cli.sequential,
        ..ParseOptions::default()
    };
    let callback = |done: u64, total: u64| eprint!("\r{:5.1}%", pct(done, total));
    let progress = if cli.progress {
        Some(&callback as &ProgressFn<'_>)
    } else {
        None
    };

    match &cli.command {
        Command::Snapshots { files } => {
            let report = scan_snapshot_files(files, &options, progress)?;
            finish_progress(cli);
            dump_snapshots(&report, cli)
        }
        Command::Rank {
            files,
            rank,
            by_instances,
            no_others,
            raw_names,
            filter,
        } => {
            let report = scan_snapshot_files(files, &options, progress)?;
            finish_progress(cli);
            report_failures(&report);
            let rank_options = RankOptions {
                rank_level: *rank,
                include_others: !no_others,
                metric: metric(*by_instances),
                java_style: !raw_names,
            };
            let mut calculator = DiffCalculator::new(rank_options);
            if let Some(needle) = filter.clone() {
                let filter: ClassFilter = Arc::new(move |r: &ObjectRecord| r.name.contains(&needle));
                calculator = calculator.with_filter(filter);
            }
            // A single snapshot still gets its top-N list.
            let diff = if report.items.len() < 2 {
                DiffReport {
                    top_n: calculator.rank_all(&report.items)?,
                    ranked_tags: Default::default(),
                    last_diff: Vec::new(),
                }
            } else {
                calculator.diff(&report.items)?
            };
            dump_rank(&report.items, &diff, cli)
        }
        Command::Refs {
            file,
            tag,
            index,
            parents,
            rank,
            by_instances,
        } => {
            let report = scan_snapshot_files(std::slice::from_ref(file), &options, progress)?;
            finish_progress(cli);
            report_failures(&report);
            let position = index.unwrap_or(report.items.len().saturating_sub(1));
            let header = report.items.get(position).ok_or_else(|| {
                Error::Precondition(format!(
                    "snapshot {position} out of range, {} available",
                    report.items.len()
                ))
            })?;
            if !header.has_reference_data() {
                return Err(Error::Precondition(format!(
                    "snapshot format {:?} carries no reference data",
                    header.format
                )));
            }
            let tracker = ReferenceTracker::new(header.body(true)?).with_rank_level(*rank);
            let metric = metric(*by_instances);
            let related = if *parents {
                tracker.parents(*tag, metric)
            } else {
                tracker.children(*tag, metric)
            };
            dump_refs(header, tracker.body().get(*tag), &related, *parents, cli)
        }
        Command::Threads { file, events } => {
            let recording = parse_thread_record(file, &ThreadRecordOptions::default(), progress)?;
            finish_progress(cli);
            dump_threads(&recording, *events, cli)
        }
        Command::Log { files } => {
            let report = parse_log_files(files, &options, progress)?;
            finish_progress(cli);
            report_failures(&report);
            dump_log(&LogHistory::new(report.items), cli)
        }
    }
}

fn metric(by_instances: bool) -> RankMetric {
    if by_instances {
        RankMetric::Instances
    } else {
        RankMetric::TotalSize
    }
}

fn finish_progress(cli: &Cli) {
    if cli.progress {
        eprintln!();
    }
}

fn report_failures<T>(report: &ParseReport<T>) {
    for failure in &report.failures {
        eprintln!("Skipped rest of {}: {}", failure.path.display(), failure.error);
    }
}

// ── Formatting helpers ───────────────────────────────────────────────────────

fn human_bytes(bytes: i64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    let b = bytes as f64;
    if b.abs() >= GIB {
        format!("{:.1} GiB", b / GIB)
    } else if b.abs() >= MIB {
        format!("{:.1} MiB", b / MIB)
    } else if b.abs() >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

fn fmt_date(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn pct(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Precondition(format!("JSON encoding failed: {e}")))?;
    println!("{json}");
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}

// ── Snapshots ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SnapshotsJson<'a> {
    snapshots: &'a [SnapshotHeader],
    summary: Option<SnapshotSummary>,
    failures: Vec<FailureJson>,
}

#[derive(Serialize)]
struct FailureJson {
    file: String,
    error: String,
}

fn failures_json<T>(report: &ParseReport<T>) -> Vec<FailureJson> {
    report
        .failures
        .iter()
        .map(|f| FailureJson {
            file: f.path.display().to_string(),
            error: f.error.to_string(),
        })
        .collect()
}

fn dump_snapshots(report: &ParseReport<SnapshotHeader>, cli: &Cli) -> Result<()> {
    let summary = if report.items.is_empty() {
        None
    } else {
        Some(SnapshotSummary::from_headers(&report.items)?)
    };

    if cli.json {
        return print_json(&SnapshotsJson {
            snapshots: &report.items,
            summary,
            failures: failures_json(report),
        });
    }

    report_failures(report);
    println!(
        "{:<23}  {:<10}  {:>6}  {:>6}  {:>10}  {:>10}  {:>8}  {:<14}",
        "Date", "Cause", "Full", "Young", "Heap", "Metaspace", "Classes", "File"
    );
    for h in &report.items {
        println!(
            "{:<23}  {:<10}  {:>6}  {:>6}  {:>10}  {:>10}  {:>8}  {:<14}",
            fmt_date(h.date()),
            h.cause.as_str(),
            h.full_gc_count,
            h.young_gc_count,
            human_bytes(h.heap_usage()),
            h.metaspace
                .map(|m| human_bytes(m.usage))
                .unwrap_or_else(|| "-".into()),
            h.num_entries,
            file_name(h.source()),
        );
    }

    if let Some(s) = summary {
        println!("\nSummary ({} snapshots):", s.count);
        println!("  Full GC             {}", s.full_gc_count);
        println!("  Young GC            {}", s.young_gc_count);
        println!("  Latest heap         {}", human_bytes(s.latest_heap_usage));
        println!("  Latest metaspace    {}", human_bytes(s.latest_metaspace_usage));
        println!(
            "  GC time             total {} ms, max {} ms",
            s.total_gc_time_ms, s.max_gc_time_ms
        );
        if let (Some(time), Some(share)) = (s.safepoint_time_ms, s.safepoint_percentage) {
            println!("  Safepoint time      {time} ms ({share:.2}%)");
        }
        println!(
            "  Largest snapshot    {} ({} classes)",
            human_bytes(s.max_snapshot_len as i64),
            s.max_entry_count
        );
        for date in &s.reboot_suspects {
            println!("  Possible JVM restart at {}", fmt_date(*date));
        }
    }
    Ok(())
}

// ── Rank / diff ──────────────────────────────────────────────────────────────

fn dump_rank(headers: &[SnapshotHeader], diff: &DiffReport, cli: &Cli) -> Result<()> {
    if cli.json {
        return print_json(diff);
    }

    for h in headers {
        let Some(top) = diff.top_n.get(&h.timestamp_ms) else {
            continue;
        };
        println!("{}  heap {}", fmt_date(h.date()), human_bytes(h.heap_usage()));
        for (i, record) in top.iter().enumerate() {
            println!(
                "  {:>2}. {:<48} {:>12} inst  {:>10}",
                i + 1,
                record.name,
                record.instances,
                human_bytes(record.total_size)
            );
        }
    }

    if diff.last_diff.is_empty() {
        return Ok(());
    }
    println!("\nDifference, first to last snapshot:");
    for d in &diff.last_diff {
        println!(
            "  {} {:<48} {:>+12} inst  {:>10}  {}",
            if d.ranked { '*' } else { ' ' },
            d.class_name,
            d.instances,
            human_bytes(d.total_size),
            d.loader_name
        );
    }
    Ok(())
}

// ── References ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RefsJson<'a> {
    snapshot: &'a SnapshotHeader,
    class: Option<&'a ObjectRecord>,
    direction: &'static str,
    related: &'a [ObjectRecord],
}

fn dump_refs(
    header: &SnapshotHeader,
    class: Option<&ObjectRecord>,
    related: &[ObjectRecord],
    parents: bool,
    cli: &Cli,
) -> Result<()> {
    let direction = if parents { "parents" } else { "children" };
    if cli.json {
        return print_json(&RefsJson {
            snapshot: header,
            class,
            direction,
            related,
        });
    }

    match class {
        Some(c) => println!(
            "{} {} ({} inst, {}) at {}",
            direction,
            c.name,
            c.instances,
            human_bytes(c.total_size),
            fmt_date(header.date())
        ),
        None => println!("class not present at {}", fmt_date(header.date())),
    }
    for r in related {
        println!(
            "  {:>8}  {:<48} {:>12} inst  {:>10}",
            r.tag,
            r.name,
            r.instances,
            human_bytes(r.total_size)
        );
    }
    Ok(())
}

// ── Threads ──────────────────────────────────────────────────────────────────

fn dump_threads(recording: &ThreadRecording, kind: EventKind, cli: &Cli) -> Result<()> {
    if cli.json {
        let filtered = ThreadRecording {
            names: recording.names.clone(),
            events: recording
                .events
                .iter()
                .filter(|e| kind.accepts(e.event))
                .copied()
                .collect(),
        };
        return print_json(&filtered);
    }

    println!(
        "{} threads, {} events",
        recording.names.len(),
        recording.events.len()
    );
    for e in recording.events.iter().filter(|e| kind.accepts(e.event)) {
        let name = recording.name_of(e.thread_id).unwrap_or("?");
        println!("{e}  [{name}]");
    }
    Ok(())
}

// ── Resource log ─────────────────────────────────────────────────────────────

fn dump_log(history: &LogHistory, cli: &Cli) -> Result<()> {
    if cli.json {
        return print_json(history);
    }

    println!(
        "{:<23}  {:>7}  {:>7}  {:>7}  {:>9}  {:>10}  {:>5}",
        "Date", "CPU%", "JavaU%", "JavaS%", "SyncPark", "Safepoint", "Note"
    );
    for d in &history.deltas {
        println!(
            "{:<23}  {:>7.1}  {:>7.1}  {:>7.1}  {:>9}  {:>8}ms  {:>5}",
            fmt_date(d.date),
            d.cpu.total(),
            d.java_user_usage,
            d.java_sys_usage,
            d.sync_park,
            d.safepoint_time_ms,
            if d.minus_data { "reset" } else { "" }
        );
    }

    if let Some(s) = &history.summary {
        println!("\nSummary ({} rows):", history.records.len());
        println!(
            "  CPU                 avg {:.1}%, max {:.1}%",
            s.average_cpu_usage, s.max_cpu_usage
        );
        println!(
            "  VSZ                 avg {:.1} MiB, max {:.1} MiB",
            s.average_vsz_mib, s.max_vsz_mib
        );
        println!(
            "  RSS                 avg {:.1} MiB, max {:.1} MiB",
            s.average_rss_mib, s.max_rss_mib
        );
        println!(
            "  Live threads        avg {:.1}, max {}",
            s.average_live_threads, s.max_live_threads
        );
    }
    Ok(())
}
