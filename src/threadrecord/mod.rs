//! Thread recorder dumps: per-thread event timeline.

pub mod model;
pub mod parser;

#[cfg(test)]
pub(crate) mod mock;

pub use model::{ThreadEvent, ThreadEventRecord, ThreadRecording};
pub use parser::{ThreadRecordOptions, ThreadRecordParser};
