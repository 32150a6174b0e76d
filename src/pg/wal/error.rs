//! Error types for WAL parsing.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::pg::control::ControlError;

/// Errors from reading and chaining WAL records.
///
/// Chain errors are transient by design: the driver reacts by repositioning
/// at the current checkpoint rather than surfacing them to the consumer.
#[derive(Debug)]
pub enum WalError {
    /// A segment file could not be opened.
    SegmentOpen {
        /// Path of the segment file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A segment file yielded fewer bytes than one page.
    SegmentRead {
        /// Path of the segment file.
        path: PathBuf,
        /// Byte offset of the attempted page read.
        offset: u64,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The control file could not be read or parsed.
    Control(ControlError),
}

impl WalError {
    /// Whether this error means the segment file has vanished.
    ///
    /// Expected under steady-state read-ahead and during segment recycling;
    /// the driver repositions silently instead of logging it.
    pub fn is_segment_missing(&self) -> bool {
        match self {
            WalError::SegmentOpen { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl fmt::Display for WalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalError::SegmentOpen { path, source } => {
                write!(f, "failed to open segment {:?}: {}", path, source)
            }
            WalError::SegmentRead {
                path,
                offset,
                source,
            } => {
                write!(
                    f,
                    "failed to read full block at 0x{:08X} from {:?}: {}",
                    offset, path, source
                )
            }
            WalError::Control(err) => write!(f, "control file: {}", err),
        }
    }
}

impl std::error::Error for WalError {}

impl From<ControlError> for WalError {
    fn from(err: ControlError) -> Self {
        WalError::Control(err)
    }
}
