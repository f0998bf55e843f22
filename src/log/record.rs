//! One row of the agent's resource log CSV.
//!
//! ```text
//! epoch_ms,cause,java_user,java_sys,vsz,rss,
//! user,nice,system,idle,iowait,irq,softirq,steal,guest,
//! sync_park,safepoint_time,safepoints,live_threads[,archive]
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::FormatError;

/// Why the agent wrote a log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LogCause {
    Exhausted,
    Signal,
    Interval,
    Deadlock,
    Illegal,
}

impl LogCause {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => LogCause::Exhausted,
            2 => LogCause::Signal,
            3 => LogCause::Interval,
            4 => LogCause::Deadlock,
            _ => LogCause::Illegal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogCause::Exhausted => "EXHAUSTED",
            LogCause::Signal => "SIGNAL",
            LogCause::Interval => "INTERVAL",
            LogCause::Deadlock => "DEADLOCK",
            LogCause::Illegal => "ILLEGAL",
        }
    }
}

/// Cumulative system CPU time, in the units of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
}

impl CpuTimes {
    pub fn fields(&self) -> [u64; 9] {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
            self.guest,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub timestamp_ms: i64,
    pub cause: LogCause,
    pub java_user_time: u64,
    pub java_sys_time: u64,
    /// Virtual memory size of the JVM process in bytes.
    pub vsz: u64,
    /// Resident set size of the JVM process in bytes.
    pub rss: u64,
    pub cpu: CpuTimes,
    pub sync_park: i64,
    pub safepoint_time_ms: i64,
    pub safepoints: i64,
    pub live_threads: i64,
    /// Archive written with this row, resolved against the log directory.
    pub archive_path: Option<PathBuf>,
}

const FIELDS: usize = 19;
const FIELDS_WITH_ARCHIVE: usize = 20;

fn field<T: FromStr>(fields: &[&str], index: usize, line: usize) -> Result<T, FormatError>
where
    T::Err: std::fmt::Display,
{
    fields[index]
        .trim()
        .parse()
        .map_err(|e: T::Err| FormatError::MalformedLog {
            line,
            reason: format!("field {} ({:?}): {}", index + 1, fields[index], e),
        })
}

impl LogRecord {
    /// Parses one CSV row. `line` is the 1-based line number used in errors.
    pub fn from_csv(csv: &str, line: usize, log_dir: &Path) -> Result<Self, FormatError> {
        let fields: Vec<&str> = csv.split(',').collect();
        if fields.len() != FIELDS && fields.len() != FIELDS_WITH_ARCHIVE {
            return Err(FormatError::MalformedLog {
                line,
                reason: format!(
                    "expected {FIELDS} or {FIELDS_WITH_ARCHIVE} fields, got {}",
                    fields.len()
                ),
            });
        }

        Ok(Self {
            timestamp_ms: field(&fields, 0, line)?,
            cause: LogCause::from_code(field(&fields, 1, line)?),
            java_user_time: field(&fields, 2, line)?,
            java_sys_time: field(&fields, 3, line)?,
            vsz: field(&fields, 4, line)?,
            rss: field(&fields, 5, line)?,
            cpu: CpuTimes {
                user: field(&fields, 6, line)?,
                nice: field(&fields, 7, line)?,
                system: field(&fields, 8, line)?,
                idle: field(&fields, 9, line)?,
                iowait: field(&fields, 10, line)?,
                irq: field(&fields, 11, line)?,
                softirq: field(&fields, 12, line)?,
                steal: field(&fields, 13, line)?,
                guest: field(&fields, 14, line)?,
            },
            sync_park: field(&fields, 15, line)?,
            safepoint_time_ms: field(&fields, 16, line)?,
            safepoints: field(&fields, 17, line)?,
            live_threads: field(&fields, 18, line)?,
            archive_path: fields
                .get(19)
                .map(|archive| log_dir.join(archive.trim())),
        })
    }

    pub fn date(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp_ms).unwrap_or_default()
    }
}
