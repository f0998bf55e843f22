//! Error types for heapstats decoding and analysis.
//!
//! Structural decode problems are [`FormatError`]s and are always fatal for
//! the file being read. Contract violations by the caller are reported as
//! [`Error::Precondition`]. Partial failures across several files are not
//! errors at all; see [`crate::provider::ParseReport`].

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for heapstats operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    #[error("precondition violated: {0}")]
    Precondition(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, source: FormatError) -> Self {
        Error::Format {
            path: path.into(),
            source,
        }
    }

    /// Returns the underlying format error, if this is one.
    pub fn as_format(&self) -> Option<&FormatError> {
        match self {
            Error::Format { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Structural decode failure inside one file.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("unknown snapshot format byte 0x{value:02x} at offset {offset}")]
    UnknownVersion { value: u8, offset: u64 },

    #[error("unknown byte order mark 0x{value:02x} at offset {offset}")]
    UnknownByteOrder { value: u8, offset: u64 },

    #[error("short read of {what} at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        what: &'static str,
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("invalid length {length} for {what} at offset {offset}")]
    InvalidLength {
        what: &'static str,
        offset: u64,
        length: i64,
    },

    #[error("unknown thread event code {code} at offset {offset}")]
    UnknownEvent { code: i64, offset: u64 },

    #[error("malformed log line {line}: {reason}")]
    MalformedLog { line: usize, reason: String },

    #[error("I/O failure at offset {offset}: {source}")]
    Read {
        offset: u64,
        #[source]
        source: std::io::Error,
    },
}
