//! Resource log CSV: JVM and host CPU/memory counters sampled by the agent.

pub mod delta;
pub mod reader;
pub mod record;

pub use delta::{CpuUsage, LogDelta, LogHistory, LogSummary, deltas};
pub use reader::read_log_file;
pub use record::{CpuTimes, LogCause, LogRecord};
