//! Test fixtures: encodes snapshot files byte-for-byte the way the agent writes them.

use std::path::Path;

use crate::snapshot::cursor::ByteOrder;
use crate::snapshot::format::{FILE_FORMAT_1_0, FormatVersion};

pub(crate) struct MockClass {
    pub tag: i64,
    pub name: String,
    pub loader_id: i64,
    pub loader_tag: i64,
    pub instances: i64,
    pub total_size: i64,
    pub children: Vec<(i64, i64, i64)>,
}

pub(crate) struct MockSnapshot {
    pub format: u8,
    pub order: ByteOrder,
    pub timestamp_ms: i64,
    pub cause: i32,
    pub gc_cause: String,
    pub full_gc_count: i64,
    pub young_gc_count: i64,
    pub gc_time_ms: i64,
    pub new_heap: i64,
    pub old_heap: i64,
    pub total_capacity: i64,
    pub metaspace: (i64, i64),
    pub safepoint_time_ms: i64,
    pub classes: Vec<MockClass>,
}

impl MockSnapshot {
    pub fn new(timestamp_ms: i64) -> Self {
        Self {
            format: 0x81,
            order: ByteOrder::Little,
            timestamp_ms,
            cause: 1,
            gc_cause: "Allocation Failure".to_string(),
            full_gc_count: 1,
            young_gc_count: 10,
            gc_time_ms: 25,
            new_heap: 0,
            old_heap: 0,
            total_capacity: 64 * 1024 * 1024,
            metaspace: (4096, 8192),
            safepoint_time_ms: 0,
            classes: Vec::new(),
        }
    }

    pub fn format(mut self, format: u8) -> Self {
        self.format = format;
        self
    }

    pub fn order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn heap(mut self, new_heap: i64, old_heap: i64) -> Self {
        self.new_heap = new_heap;
        self.old_heap = old_heap;
        self
    }

    pub fn class(mut self, tag: i64, name: &str, instances: i64, total_size: i64) -> Self {
        self.classes.push(MockClass {
            tag,
            name: name.to_string(),
            loader_id: 0,
            loader_tag: 0,
            instances,
            total_size,
            children: Vec::new(),
        });
        self
    }

    pub fn loader(mut self, tag: i64, loader_id: i64, loader_tag: i64) -> Self {
        if let Some(class) = self.classes.iter_mut().find(|c| c.tag == tag) {
            class.loader_id = loader_id;
            class.loader_tag = loader_tag;
        }
        self
    }

    pub fn child(mut self, parent: i64, child: i64, instances: i64, total_size: i64) -> Self {
        if let Some(class) = self.classes.iter_mut().find(|c| c.tag == parent) {
            class.children.push((child, instances, total_size));
        }
        self
    }

    /// Heap usage equal to the sum of all class sizes.
    pub fn heap_from_classes(self) -> Self {
        let total: i64 = self.classes.iter().map(|c| c.total_size).sum();
        self.heap(0, total)
    }

    pub fn encode(&self) -> Vec<u8> {
        let version = FormatVersion::from_byte(self.format).expect("fixture format must be valid");
        let mut buf = Vec::new();
        let order = self.order;
        let put_i64 = |buf: &mut Vec<u8>, v: i64| match order {
            ByteOrder::Little => buf.extend_from_slice(&v.to_le_bytes()),
            ByteOrder::Big => buf.extend_from_slice(&v.to_be_bytes()),
        };
        let put_i32 = |buf: &mut Vec<u8>, v: i32| match order {
            ByteOrder::Little => buf.extend_from_slice(&v.to_le_bytes()),
            ByteOrder::Big => buf.extend_from_slice(&v.to_be_bytes()),
        };

        buf.push(self.format);
        buf.push(order.mark());
        put_i64(&mut buf, self.timestamp_ms);
        put_i64(&mut buf, self.classes.len() as i64);
        put_i32(&mut buf, self.cause);
        if self.gc_cause.is_empty() {
            put_i64(&mut buf, 1);
            buf.push(0);
        } else {
            put_i64(&mut buf, self.gc_cause.len() as i64);
            buf.extend_from_slice(self.gc_cause.as_bytes());
        }
        for v in [
            self.full_gc_count,
            self.young_gc_count,
            self.gc_time_ms,
            self.new_heap,
            self.old_heap,
            self.total_capacity,
        ] {
            put_i64(&mut buf, v);
        }
        if version.has_metaspace() {
            put_i64(&mut buf, self.metaspace.0);
            put_i64(&mut buf, self.metaspace.1);
        }
        if version.has_safepoint_time() {
            put_i64(&mut buf, self.safepoint_time_ms);
        }

        for class in &self.classes {
            put_i64(&mut buf, class.tag);
            put_i64(&mut buf, class.name.len() as i64);
            buf.extend_from_slice(class.name.as_bytes());
            if self.format != FILE_FORMAT_1_0 {
                put_i64(&mut buf, class.loader_id);
                put_i64(&mut buf, class.loader_tag);
            }
            put_i64(&mut buf, class.instances);
            put_i64(&mut buf, class.total_size);
            if version.has_reference_data() {
                for &(tag, instances, size) in &class.children {
                    put_i64(&mut buf, tag);
                    put_i64(&mut buf, instances);
                    put_i64(&mut buf, size);
                }
                put_i64(&mut buf, -1);
                put_i64(&mut buf, 0);
                put_i64(&mut buf, 0);
            }
        }
        buf
    }
}

pub(crate) fn encode_all(snapshots: &[MockSnapshot]) -> Vec<u8> {
    snapshots.iter().flat_map(MockSnapshot::encode).collect()
}

pub(crate) fn write_snapshots(path: &Path, snapshots: &[MockSnapshot]) {
    std::fs::write(path, encode_all(snapshots)).expect("write fixture");
}

/// The two-class histogram used across the analysis tests.
pub(crate) fn string_and_bytes(timestamp_ms: i64) -> MockSnapshot {
    MockSnapshot::new(timestamp_ms)
        .class(0x1, "java/lang/String", 100, 1_600_000)
        .class(0x2, "[B", 50, 800_000)
        .heap_from_classes()
}
