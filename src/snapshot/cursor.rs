//! Byte-order aware reader over a seekable byte source.
//!
//! Every read is checked against the number of bytes actually returned: a
//! short read is a [`FormatError::ShortRead`], never an end-of-file marker.
//! The only place a clean end of input is accepted is [`BinaryCursor::try_read_u8`],
//! which the snapshot parser uses to detect the end of a multi-snapshot file.

use std::io::{self, Read, Seek, SeekFrom};

use serde::Serialize;

use crate::error::FormatError;

/// Byte order of multi-byte integers in a heapstats file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Decodes the one-byte marker written by the agent (`L` or `B`).
    pub fn from_mark(mark: u8) -> Option<Self> {
        match mark {
            b'L' => Some(ByteOrder::Little),
            b'B' => Some(ByteOrder::Big),
            _ => None,
        }
    }

    pub fn mark(self) -> u8 {
        match self {
            ByteOrder::Little => b'L',
            ByteOrder::Big => b'B',
        }
    }

    /// Reads an `i64` from the first 8 bytes of `bytes`.
    pub fn i64_from(self, bytes: [u8; 8]) -> i64 {
        match self {
            ByteOrder::Little => i64::from_le_bytes(bytes),
            ByteOrder::Big => i64::from_be_bytes(bytes),
        }
    }

    pub fn i32_from(self, bytes: [u8; 4]) -> i32 {
        match self {
            ByteOrder::Little => i32::from_le_bytes(bytes),
            ByteOrder::Big => i32::from_be_bytes(bytes),
        }
    }

    /// Decodes the `index`-th 8-byte word of a fixed-size record.
    pub fn word(self, record: &[u8], index: usize) -> i64 {
        let start = index * 8;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&record[start..start + 8]);
        self.i64_from(bytes)
    }
}

/// Sequential reader that tracks its own offset and the total source length.
pub struct BinaryCursor<R> {
    inner: R,
    order: ByteOrder,
    position: u64,
    len: u64,
}

impl<R: Read + Seek> BinaryCursor<R> {
    /// Wraps `inner`, which must be positioned at offset 0 and hold `len` bytes.
    pub fn new(inner: R, len: u64) -> Self {
        Self {
            inner,
            order: ByteOrder::Big,
            position: 0,
            len,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.position)
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<(), FormatError> {
        self.inner
            .seek(SeekFrom::Start(offset))
            .map_err(|source| FormatError::Read {
                offset: self.position,
                source,
            })?;
        self.position = offset;
        Ok(())
    }

    /// Reads one byte, returning `None` only when the source is exhausted
    /// exactly at the current offset.
    pub fn try_read_u8(&mut self) -> Result<Option<u8>, FormatError> {
        let mut byte = [0u8; 1];
        let got = self.fill(&mut byte)?;
        Ok((got == 1).then_some(byte[0]))
    }

    pub fn read_u8(&mut self, what: &'static str) -> Result<u8, FormatError> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte, what)?;
        Ok(byte[0])
    }

    pub fn read_i32(&mut self, what: &'static str) -> Result<i32, FormatError> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes, what)?;
        Ok(self.order.i32_from(bytes))
    }

    pub fn read_i64(&mut self, what: &'static str) -> Result<i64, FormatError> {
        let mut bytes = [0u8; 8];
        self.read_exact(&mut bytes, what)?;
        Ok(self.order.i64_from(bytes))
    }

    /// Reads a block whose length was just decoded from the stream.
    ///
    /// The length is validated against the bytes left in the source before
    /// anything is allocated.
    pub fn read_block(&mut self, length: i64, what: &'static str) -> Result<Vec<u8>, FormatError> {
        if length < 0 {
            return Err(FormatError::InvalidLength {
                what,
                offset: self.position,
                length,
            });
        }
        let length = length as u64;
        if length > self.remaining() {
            return Err(FormatError::ShortRead {
                what,
                offset: self.position,
                expected: length,
                actual: self.remaining(),
            });
        }
        let mut block = vec![0u8; length as usize];
        self.read_exact(&mut block, what)?;
        Ok(block)
    }

    pub fn read_exact(&mut self, buf: &mut [u8], what: &'static str) -> Result<(), FormatError> {
        let offset = self.position;
        let got = self.fill(buf)?;
        if got != buf.len() {
            return Err(FormatError::ShortRead {
                what,
                offset,
                expected: buf.len() as u64,
                actual: got as u64,
            });
        }
        Ok(())
    }

    /// Reads as many bytes as are available, up to `buf.len()`.
    pub fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, FormatError> {
        self.fill(buf)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, FormatError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(FormatError::Read {
                        offset: self.position + filled as u64,
                        source,
                    });
                }
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }
}
