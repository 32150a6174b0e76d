//! Pipeline startup errors.

use std::fmt;
use std::io;

use crate::pg::wal::WalError;

/// Errors surfaced from starting the pipeline.
///
/// Once running, the stages keep their errors to themselves: chain errors
/// resync the cursor, population errors ride on the messages, spill errors
/// are logged. Only startup can fail loudly.
#[derive(Debug)]
pub enum StreamError {
    /// `start` was called while a previous start is still running.
    AlreadyStreaming,

    /// The checkpoint position could not be established.
    Wal(WalError),

    /// The spill directory could not be created.
    BufferDirectory(io::Error),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::AlreadyStreaming => write!(f, "already publishing"),
            StreamError::Wal(err) => write!(f, "wal: {}", err),
            StreamError::BufferDirectory(err) => {
                write!(f, "failed to create buffer directory: {}", err)
            }
        }
    }
}

impl std::error::Error for StreamError {}

impl From<WalError> for StreamError {
    fn from(err: WalError) -> Self {
        StreamError::Wal(err)
    }
}
