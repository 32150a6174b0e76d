//! WAL record bodies.

use bytes::{Bytes, BytesMut};

use super::location::Location;
use super::page::Page;
use super::record::RecordHeader;

/// Collects the bytes that make up the body of a record.
///
/// The body starts on the header's page and, when longer than the space
/// left there, continues across one or more following pages as
/// continuations. The cursor appends pieces until [`RecordBody::is_complete`].
#[derive(Debug)]
pub struct RecordBody {
    bytes: BytesMut,
    needed: u64,
}

impl RecordBody {
    /// Creates an empty body sized from a record header.
    pub fn new(header: &RecordHeader) -> Self {
        let needed = (header.total_length() as u64).saturating_sub(header.aligned_size());
        Self {
            bytes: BytesMut::new(),
            needed,
        }
    }

    /// Appends what is available of the body on the header's own page.
    ///
    /// Returns the number of bytes appended.
    pub fn append_body_after_header(&mut self, block: &Bytes, location: Location) -> u64 {
        let piece = read_body(block, location, self.needed);
        self.bytes.extend_from_slice(&piece);
        piece.len() as u64
    }

    /// Appends a continuation from a page.
    ///
    /// Returns 0 when the page has no continuation; the record cannot be
    /// assembled in that case.
    pub fn append_continuation(&mut self, page: &Page) -> u64 {
        match page.continuation() {
            Some(cont) => {
                self.bytes.extend_from_slice(&cont);
                cont.len() as u64
            }
            None => 0,
        }
    }

    /// Whether everything that needs to be read of the body has been read.
    pub fn is_complete(&self) -> bool {
        self.bytes.len() as u64 >= self.needed
    }

    /// The body bytes collected so far.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Reads up to `length` body bytes from `location` to the end of the page.
fn read_body(block: &Bytes, location: Location, length: u64) -> Bytes {
    let start = location.from_start_of_page();
    let block_len = block.len() as u64;

    if start >= block_len {
        return Bytes::new();
    }

    let remaining = block_len - start;
    let end = start + length.min(remaining);

    block.slice(start as usize..end as usize)
}
