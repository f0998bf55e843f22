//! Thread recorder events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Event kinds written by the agent's thread recorder, in code order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ThreadEvent {
    /// Ring-buffer slot never written. Never emitted by the parser.
    Unused,
    ThreadStart,
    ThreadEnd,
    MonitorWait,
    MonitorWaited,
    MonitorContendedEnter,
    MonitorContendedEntered,
    ThreadSleepStart,
    ThreadSleepEnd,
    Park,
    Unpark,
    FileWriteStart,
    FileWriteEnd,
    FileReadStart,
    FileReadEnd,
    SocketWriteStart,
    SocketWriteEnd,
    SocketReadStart,
    SocketReadEnd,
}

const EVENTS: [ThreadEvent; 19] = [
    ThreadEvent::Unused,
    ThreadEvent::ThreadStart,
    ThreadEvent::ThreadEnd,
    ThreadEvent::MonitorWait,
    ThreadEvent::MonitorWaited,
    ThreadEvent::MonitorContendedEnter,
    ThreadEvent::MonitorContendedEntered,
    ThreadEvent::ThreadSleepStart,
    ThreadEvent::ThreadSleepEnd,
    ThreadEvent::Park,
    ThreadEvent::Unpark,
    ThreadEvent::FileWriteStart,
    ThreadEvent::FileWriteEnd,
    ThreadEvent::FileReadStart,
    ThreadEvent::FileReadEnd,
    ThreadEvent::SocketWriteStart,
    ThreadEvent::SocketWriteEnd,
    ThreadEvent::SocketReadStart,
    ThreadEvent::SocketReadEnd,
];

impl ThreadEvent {
    pub fn from_code(code: i64) -> Option<Self> {
        usize::try_from(code).ok().and_then(|i| EVENTS.get(i).copied())
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    /// Events that suspend the thread: monitor waits, contention, sleep, park.
    pub fn is_suspend(self) -> bool {
        matches!(
            self,
            ThreadEvent::MonitorWait
                | ThreadEvent::MonitorWaited
                | ThreadEvent::MonitorContendedEnter
                | ThreadEvent::MonitorContendedEntered
                | ThreadEvent::ThreadSleepStart
                | ThreadEvent::ThreadSleepEnd
                | ThreadEvent::Park
                | ThreadEvent::Unpark
        )
    }

    pub fn is_lock(self) -> bool {
        matches!(
            self,
            ThreadEvent::MonitorContendedEnter
                | ThreadEvent::MonitorContendedEntered
                | ThreadEvent::Park
                | ThreadEvent::Unpark
        )
    }

    pub fn is_io(self) -> bool {
        matches!(
            self,
            ThreadEvent::FileWriteStart
                | ThreadEvent::FileWriteEnd
                | ThreadEvent::FileReadStart
                | ThreadEvent::FileReadEnd
                | ThreadEvent::SocketWriteStart
                | ThreadEvent::SocketWriteEnd
                | ThreadEvent::SocketReadStart
                | ThreadEvent::SocketReadEnd
        )
    }
}

/// One 32-byte ring-buffer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThreadEventRecord {
    pub timestamp_ms: i64,
    pub thread_id: i64,
    pub event: ThreadEvent,
    /// Event-specific value (bytes written, monitor id, ...).
    pub payload: i64,
}

impl ThreadEventRecord {
    pub fn date(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp_ms).unwrap_or_default()
    }
}

impl std::fmt::Display for ThreadEventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}: {:?} ({})",
            self.thread_id,
            self.date().format("%Y-%m-%dT%H:%M:%S%.3f"),
            self.event,
            self.payload
        )
    }
}

/// A decoded recorder dump: thread names plus time-ordered events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThreadRecording {
    pub names: HashMap<i64, String>,
    pub events: Vec<ThreadEventRecord>,
}

impl ThreadRecording {
    pub fn name_of(&self, thread_id: i64) -> Option<&str> {
        self.names.get(&thread_id).map(String::as_str)
    }
}
