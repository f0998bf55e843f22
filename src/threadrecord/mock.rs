//! Test fixtures: thread recorder dumps in either byte order.

use crate::snapshot::ByteOrder;

pub(crate) struct MockRecording {
    pub order: ByteOrder,
    pub names: Vec<(i64, String)>,
    /// `(timestamp, thread id, event code, payload)`
    pub events: Vec<(i64, i64, i64, i64)>,
    /// Raw bytes appended after the last record.
    pub trailing: Vec<u8>,
}

impl MockRecording {
    pub fn new(order: ByteOrder) -> Self {
        Self {
            order,
            names: Vec::new(),
            events: Vec::new(),
            trailing: Vec::new(),
        }
    }

    pub fn thread(mut self, id: i64, name: &str) -> Self {
        self.names.push((id, name.to_string()));
        self
    }

    pub fn event(mut self, timestamp: i64, thread_id: i64, code: i64, payload: i64) -> Self {
        self.events.push((timestamp, thread_id, code, payload));
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let order = self.order;
        let i64_bytes = |v: i64| match order {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        };
        let i32_bytes = |v: i32| match order {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        };

        let mut buf = vec![order.mark()];
        buf.extend_from_slice(&i32_bytes(self.names.len() as i32));
        for (id, name) in &self.names {
            buf.extend_from_slice(&i64_bytes(*id));
            buf.extend_from_slice(&i32_bytes(name.len() as i32));
            buf.extend_from_slice(name.as_bytes());
        }
        for &(time, id, code, payload) in &self.events {
            for word in [time, id, code, payload] {
                buf.extend_from_slice(&i64_bytes(word));
            }
        }
        buf.extend_from_slice(&self.trailing);
        buf
    }
}
