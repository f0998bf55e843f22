//! heapstats — decoder and analyzer for HeapStats JVM agent output.
//!
//! Provides:
//! - `snapshot` — heap histogram snapshot format, streaming parser, summary
//! - `threadrecord` — thread recorder dump parser
//! - `log` — resource log CSV rows, interval deltas, summary
//! - `analysis` — top-N ranking, snapshot diff, reference graph
//! - `provider` — multi-file orchestration with progress and failure policy
//! - `progress` — shared byte-based progress counter
//! - `error` — error types

pub mod analysis;
pub mod error;
pub mod log;
pub mod progress;
pub mod provider;
pub mod snapshot;
pub mod threadrecord;

pub use error::{Error, FormatError, Result};
pub use provider::{FileFailure, ParseMode, ParseOptions, ParseReport};
