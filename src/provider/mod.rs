//! File orchestration for heapstats data sources.
//!
//! Runs a list of input files through the matching parser, reports
//! byte-based progress and applies the failure policy:
//! - [`ParseMode::Strict`]: the first failing file fails the whole call and
//!   no partial result is exposed. Files not yet started are skipped.
//! - [`ParseMode::BestEffort`]: everything decoded before a failure is kept;
//!   failures are returned alongside the results once every file was tried.
//!
//! Results are always sorted into capture-time order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::log::{LogRecord, read_log_file};
use crate::progress::{Progress, ProgressFn};
use crate::snapshot::{HeaderListSink, SnapshotHeader, SnapshotParser};
use crate::threadrecord::{ThreadRecordOptions, ThreadRecordParser, ThreadRecording};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ParseMode {
    #[default]
    Strict,
    BestEffort,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseOptions {
    /// Decode class names into display form when bodies are loaded.
    pub java_style: bool,
    pub mode: ParseMode,
    /// Parse independent files on the rayon pool.
    pub parallel: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            java_style: true,
            mode: ParseMode::Strict,
            parallel: true,
        }
    }
}

/// A file that could not be parsed to the end.
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: Error,
}

/// Aggregate of a multi-file run.
#[derive(Debug)]
pub struct ParseReport<T> {
    pub items: Vec<T>,
    /// Always empty in strict mode.
    pub failures: Vec<FileFailure>,
}

impl<T> ParseReport<T> {
    /// `true` when every file was decoded to the end.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Converts a partial result into the first failure.
    pub fn into_complete(mut self) -> Result<Vec<T>> {
        if self.failures.is_empty() {
            Ok(self.items)
        } else {
            Err(self.failures.swap_remove(0).error)
        }
    }
}

/// What one file produced: everything decoded, plus the failure that stopped it.
struct FileResult<T> {
    path: PathBuf,
    items: Vec<T>,
    error: Option<Error>,
}

fn total_bytes(paths: &[PathBuf]) -> u64 {
    paths
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

fn run_files<T, F>(paths: &[PathBuf], options: &ParseOptions, parse: F) -> Vec<FileResult<T>>
where
    T: Send,
    F: Fn(&Path) -> FileResult<T> + Sync + Send,
{
    if options.parallel {
        // Strict mode stops handing out files after a failure; files already
        // being parsed run to the end.
        let failed = AtomicBool::new(false);
        let strict = options.mode == ParseMode::Strict;
        return paths
            .par_iter()
            .filter_map(|p| {
                if strict && failed.load(Ordering::Relaxed) {
                    return None;
                }
                let result = parse(p.as_path());
                if result.error.is_some() {
                    failed.store(true, Ordering::Relaxed);
                }
                Some(result)
            })
            .collect();
    }

    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        let result = parse(path.as_path());
        let failed = result.error.is_some();
        results.push(result);
        if failed && options.mode == ParseMode::Strict {
            break;
        }
    }
    results
}

fn assemble<T>(
    results: Vec<FileResult<T>>,
    mode: ParseMode,
    sort_key: impl Fn(&T) -> i64,
) -> Result<ParseReport<T>> {
    let mut items = Vec::new();
    let mut failures = Vec::new();

    for result in results {
        if let Some(error) = result.error {
            if mode == ParseMode::Strict {
                return Err(error);
            }
            warn!(
                path = %result.path.display(),
                error = %error,
                kept = result.items.len(),
                "file only partially parsed"
            );
            failures.push(FileFailure {
                path: result.path,
                error,
            });
        }
        items.extend(result.items);
    }

    items.sort_by_key(|item| sort_key(item));
    Ok(ParseReport { items, failures })
}

/// Scans the snapshot headers of every file.
///
/// Progress is reported in bytes of finished snapshots against the summed
/// file sizes.
pub fn scan_snapshot_files(
    paths: &[PathBuf],
    options: &ParseOptions,
    progress: Option<&ProgressFn<'_>>,
) -> Result<ParseReport<SnapshotHeader>> {
    let started = Instant::now();
    let progress = Progress::new(total_bytes(paths), progress);
    let parser = SnapshotParser::new(false);

    let results = run_files(paths, options, |path| {
        let mut sink = HeaderListSink::with_progress(|len| progress.advance(len));
        let error = parser.parse_file(path, &mut sink).err();
        FileResult {
            path: path.to_path_buf(),
            items: sink.into_headers(),
            error,
        }
    });

    let report = assemble(results, options.mode, |h: &SnapshotHeader| h.timestamp_ms)?;
    info!(
        files = paths.len(),
        snapshots = report.items.len(),
        failures = report.failures.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scanned snapshot files"
    );
    Ok(report)
}

/// Reads every resource log file. Progress is counted in line bytes.
pub fn parse_log_files(
    paths: &[PathBuf],
    options: &ParseOptions,
    progress: Option<&ProgressFn<'_>>,
) -> Result<ParseReport<LogRecord>> {
    let progress = Progress::new(total_bytes(paths), progress);

    let results = run_files(paths, options, |path| {
        let mut items = Vec::new();
        let error = read_log_file(path, &mut items, |n| progress.advance(n)).err();
        FileResult {
            path: path.to_path_buf(),
            items,
            error,
        }
    });

    let report = assemble(results, options.mode, |r: &LogRecord| r.timestamp_ms)?;
    info!(
        files = paths.len(),
        rows = report.items.len(),
        failures = report.failures.len(),
        "parsed log files"
    );
    Ok(report)
}

/// Decodes one thread recorder dump. Progress is reported once, on completion.
pub fn parse_thread_record(
    path: &Path,
    options: &ThreadRecordOptions,
    progress: Option<&ProgressFn<'_>>,
) -> Result<ThreadRecording> {
    let len = std::fs::metadata(path).map_err(|e| Error::io(path, e))?.len();
    let progress = Progress::new(len, progress);
    let recording = ThreadRecordParser::new(*options).parse_file(path)?;
    progress.advance(len);
    Ok(recording)
}

/// Loads every snapshot body into its cache.
pub fn preload_bodies(headers: &[SnapshotHeader], options: &ParseOptions) -> Result<()> {
    let load = |h: &SnapshotHeader| h.body(options.java_style).map(drop);
    if options.parallel {
        headers.par_iter().try_for_each(load)
    } else {
        headers.iter().try_for_each(load)
    }
}

/// Releases least recently used bodies until at most `max_loaded` stay cached.
/// Returns how many were released.
pub fn trim_body_caches(headers: &[SnapshotHeader], max_loaded: usize) -> usize {
    let mut seen = HashSet::new();
    let mut loaded: Vec<(Instant, &SnapshotHeader)> = headers
        .iter()
        .filter(|h| seen.insert(Arc::as_ptr(&h.cache)))
        .filter_map(|h| h.body_cache().last_accessed().map(|at| (at, h)))
        .collect();
    if loaded.len() <= max_loaded {
        return 0;
    }

    loaded.sort_by_key(|(at, _)| *at);
    let excess = loaded.len() - max_loaded;
    let released = loaded[..excess]
        .iter()
        .filter(|(_, h)| h.release_body())
        .count();
    debug!(released, kept = max_loaded, "trimmed snapshot body caches");
    released
}
