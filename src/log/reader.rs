//! Line-by-line reader for resource log files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::log::record::LogRecord;

/// Appends every row of `path` to `records`, in file order.
///
/// Rows decoded before a failure stay in `records`. `on_bytes` receives the
/// byte length of each consumed line, line terminator included. Blank lines
/// are skipped.
pub fn read_log_file(
    path: &Path,
    records: &mut Vec<LogRecord>,
    mut on_bytes: impl FnMut(u64),
) -> Result<()> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let log_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut line_no = 0usize;
    let before = records.len();

    loop {
        line.clear();
        let read = reader.read_line(&mut line).map_err(|e| Error::io(path, e))?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let row = line.trim_end_matches(['\r', '\n']);
        if !row.trim().is_empty() {
            let record =
                LogRecord::from_csv(row, line_no, log_dir).map_err(|e| Error::format(path, e))?;
            records.push(record);
        }
        on_bytes(read as u64);
    }

    debug!(path = %path.display(), rows = records.len() - before, "parsed log file");
    Ok(())
}
