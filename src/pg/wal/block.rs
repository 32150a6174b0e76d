//! Page loads from WAL segment files.

use std::path::PathBuf;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::error::WalError;
use super::location::Location;

/// Loads single pages out of the segment files under `<dataDir>/pg_xlog`.
///
/// Each read opens the segment file named by the location, seeks to the
/// start of the page containing it, and reads exactly one page. A missing
/// file or a short read is an explicit [`WalError`]; the segment being gone
/// is an expected condition during WAL recycling (see
/// [`WalError::is_segment_missing`]).
#[derive(Debug, Clone)]
pub struct BlockReader {
    data_dir: PathBuf,
    block_size: u32,
    word_size: u32,
}

impl BlockReader {
    /// Creates a reader for the given data directory and geometry.
    pub fn new(data_dir: impl Into<PathBuf>, block_size: u32, word_size: u32) -> Self {
        Self {
            data_dir: data_dir.into(),
            block_size,
            word_size,
        }
    }

    /// Size in bytes of the pages this reader loads.
    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Alignment word size of the log this reader reads.
    pub const fn word_size(&self) -> u32 {
        self.word_size
    }

    /// Reads the page containing `location`.
    pub async fn read_block(&self, location: Location) -> Result<Bytes, WalError> {
        let path = self.data_dir.join("pg_xlog").join(location.filename());

        let mut file = File::open(&path)
            .await
            .map_err(|source| WalError::SegmentOpen {
                path: path.clone(),
                source,
            })?;

        let page_offset = location.start_of_page().from_start_of_file();
        let mut block = vec![0u8; self.block_size as usize];

        let read = async {
            file.seek(std::io::SeekFrom::Start(page_offset)).await?;
            file.read_exact(&mut block).await
        };
        read.await.map_err(|source| WalError::SegmentRead {
            path,
            offset: page_offset,
            source,
        })?;

        Ok(Bytes::from(block))
    }
}
