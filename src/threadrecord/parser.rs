//! Thread recorder dump decoder.
//!
//! ```text
//! byte_order: u8                          'L' | 'B'
//! thread_count: i32
//! (id: i64, name_len: i32, name: [u8; name_len]) × thread_count
//! (timestamp, thread_id, event, payload): i64 × 4 … until EOF
//! ```
//! The event region is the agent's ring buffer written out verbatim, so it
//! may contain unused slots: an `Unused` record ends the current read chunk
//! and decoding resumes with the next one.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, FormatError, Result};
use crate::snapshot::{BinaryCursor, ByteOrder};
use crate::threadrecord::model::{ThreadEvent, ThreadEventRecord, ThreadRecording};

/// Size of one event record on disk.
pub const RECORD_LEN: usize = 32;

const NAME_ENTRY_MIN_LEN: i64 = 12;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThreadRecordOptions {
    /// Bytes of the event region read per chunk.
    pub chunk_size: usize,
}

impl Default for ThreadRecordOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
        }
    }
}

impl ThreadRecordOptions {
    /// Chunk size rounded down to whole records, never below one record.
    pub fn effective_chunk_size(&self) -> usize {
        (self.chunk_size / RECORD_LEN).max(1) * RECORD_LEN
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThreadRecordParser {
    options: ThreadRecordOptions,
}

impl ThreadRecordParser {
    pub fn new(options: ThreadRecordOptions) -> Self {
        Self { options }
    }

    pub fn parse_file(&self, path: &Path) -> Result<ThreadRecording> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let len = file.metadata().map_err(|e| Error::io(path, e))?.len();
        let recording = self.parse_reader(BufReader::new(file), len, path)?;
        debug!(
            path = %path.display(),
            threads = recording.names.len(),
            events = recording.events.len(),
            "parsed thread recording"
        );
        Ok(recording)
    }

    /// Decodes a dump from `reader`, which holds `len` bytes. `source` is
    /// only used in error reports.
    pub fn parse_reader<R: Read + Seek>(
        &self,
        reader: R,
        len: u64,
        source: &Path,
    ) -> Result<ThreadRecording> {
        let mut cursor = BinaryCursor::new(reader, len);
        let names = read_names(&mut cursor).map_err(|e| Error::format(source, e))?;
        let mut events = self
            .read_events(&mut cursor)
            .map_err(|e| Error::format(source, e))?;

        events.par_sort_by_key(|e| e.timestamp_ms);
        Ok(ThreadRecording { names, events })
    }

    fn read_events<R: Read + Seek>(
        &self,
        cursor: &mut BinaryCursor<R>,
    ) -> std::result::Result<Vec<ThreadEventRecord>, FormatError> {
        let order = cursor.order();
        let mut chunk = vec![0u8; self.options.effective_chunk_size()];
        let mut events = Vec::new();

        loop {
            let chunk_start = cursor.position();
            let got = cursor.read_available(&mut chunk)?;
            if got == 0 {
                break;
            }
            let partial = got % RECORD_LEN;
            if partial != 0 {
                return Err(FormatError::ShortRead {
                    what: "thread event record",
                    offset: chunk_start + (got - partial) as u64,
                    expected: RECORD_LEN as u64,
                    actual: partial as u64,
                });
            }

            for (i, record) in chunk[..got].chunks_exact(RECORD_LEN).enumerate() {
                let code = order.word(record, 2);
                let event = ThreadEvent::from_code(code).ok_or(FormatError::UnknownEvent {
                    code,
                    offset: chunk_start + (i * RECORD_LEN) as u64,
                })?;
                if event == ThreadEvent::Unused {
                    break;
                }
                events.push(ThreadEventRecord {
                    timestamp_ms: order.word(record, 0),
                    thread_id: order.word(record, 1),
                    event,
                    payload: order.word(record, 3),
                });
            }

            if got < chunk.len() {
                break;
            }
        }

        Ok(events)
    }
}

fn read_names<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
) -> std::result::Result<HashMap<i64, String>, FormatError> {
    let mark = cursor.read_u8("byte order mark")?;
    let order = ByteOrder::from_mark(mark).ok_or(FormatError::UnknownByteOrder {
        value: mark,
        offset: 0,
    })?;
    cursor.set_order(order);

    let count_offset = cursor.position();
    let count = cursor.read_i32("thread id table size")?;
    // Each entry takes at least an id and a name length.
    if count < 0 || i64::from(count) * NAME_ENTRY_MIN_LEN > cursor.remaining() as i64 {
        return Err(FormatError::InvalidLength {
            what: "thread id table size",
            offset: count_offset,
            length: count.into(),
        });
    }

    let mut names = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let id = cursor.read_i64("thread id")?;
        let len = cursor.read_i32("thread name length")?;
        let bytes = cursor.read_block(len.into(), "thread name")?;
        let name = String::from_utf8(bytes).unwrap_or_else(|e| {
            debug!(id, "thread name is not valid UTF-8");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        });
        names.insert(id, name);
    }
    Ok(names)
}
