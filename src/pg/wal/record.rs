//! WAL record headers.

use bytes::{Bytes, BytesMut};

use super::bits::lu32;
use super::block::BlockReader;
use super::error::WalError;
use super::location::Location;
use super::page::{Page, WalVersion};

impl WalVersion {
    /// The size in bytes of a record header in this format.
    pub const fn header_size(&self) -> u64 {
        match self {
            WalVersion::V91 => 26,
            WalVersion::V94 => 28,
        }
    }
}

/// How the resource-manager data of a record should be interpreted.
///
/// The discriminants are the values used by the 61-byte entry wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// An entry in the WAL that is not interesting to us.
    Unknown = 0,
    /// A tuple being inserted into a heap.
    Insert = 1,
    /// A tuple being updated in the heap.
    Update = 2,
    /// A tuple being deleted from the heap.
    Delete = 3,
    /// A transaction being committed.
    Commit = 4,
    /// A transaction being aborted.
    Abort = 5,
    /// Multiple tuples being inserted into one heap page.
    MultiInsert = 6,
}

impl RecordType {
    /// The wire-form discriminant of this type.
    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Reads a type back from its wire-form discriminant.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => RecordType::Insert,
            2 => RecordType::Update,
            3 => RecordType::Delete,
            4 => RecordType::Commit,
            5 => RecordType::Abort,
            6 => RecordType::MultiInsert,
            _ => RecordType::Unknown,
        }
    }
}

/// The header of one xlog record.
///
/// Field layout by format:
///
/// ```text
/// V91 (26 bytes): crc:4 | prev:8 (hi,lo) | xid:4 | tot_len:4 | len:4 | info:1 | rmid:1
/// V94 (28 bytes): tot_len:4 | xid:4 | len:4 | info:1 | rmid:1 | pad:2 | prev:8 (lo,hi) | crc:4
/// ```
///
/// A V94 header may straddle the page boundary; its tail is then stitched
/// from the next page's continuation. V91 headers never straddle.
#[derive(Debug, Clone)]
pub struct RecordHeader {
    read_from: Location,
    after_header: Location,
    bytes: Bytes,
    version: WalVersion,
}

impl RecordHeader {
    /// Parses a record header at `location` within `block`.
    ///
    /// Returns `Ok(None)` when no header can be read at that position: a
    /// V91 header straddling the page end, or a V94 straddle whose next
    /// page carries no usable continuation.
    pub async fn parse(
        block: &Bytes,
        location: Location,
        version: WalVersion,
        reader: &BlockReader,
    ) -> Result<Option<RecordHeader>, WalError> {
        let size = version.header_size();
        let start = location.from_start_of_page() as usize;
        let end = start + size as usize;

        let mut after_header = location.add(size).aligned();

        let bytes = if end > block.len() {
            match version {
                WalVersion::V91 => return Ok(None),
                WalVersion::V94 => {
                    // The tail of the header lives on the next page, inside
                    // its continuation. The first 4 continuation bytes are
                    // skipped, and the body restart point moves past the next
                    // page's header plus 8 bytes.
                    let next_block = reader.read_block(location.add(size)).await?;
                    let next_page = Page::new(next_block);
                    let cont = match next_page.continuation() {
                        Some(cont) if cont.len() >= 4 => cont,
                        _ => return Ok(None),
                    };

                    let mut stitched = BytesMut::from(&block[..]);
                    stitched.extend_from_slice(&cont[4..]);
                    if stitched.len() < end {
                        return Ok(None);
                    }

                    after_header = location
                        .add(size)
                        .add(next_page.header_length())
                        .add(8)
                        .aligned();

                    stitched.freeze().slice(start..end)
                }
            }
        } else {
            block.slice(start..end)
        };

        Ok(Some(RecordHeader {
            read_from: location,
            after_header,
            bytes,
            version,
        }))
    }

    /// The location this header was read from.
    pub const fn read_from(&self) -> Location {
        self.read_from
    }

    /// The aligned location where the record body starts.
    pub const fn after_header(&self) -> Location {
        self.after_header
    }

    /// The crc of the record.
    pub fn crc(&self) -> u32 {
        match self.version {
            WalVersion::V91 => lu32(&self.bytes, 0),
            WalVersion::V94 => lu32(&self.bytes, 24),
        }
    }

    /// The location of the record that precedes this one.
    pub fn previous(&self) -> Location {
        match self.version {
            WalVersion::V91 => Location::from_u32s(lu32(&self.bytes, 4), lu32(&self.bytes, 8)),
            WalVersion::V94 => Location::from_u32s(lu32(&self.bytes, 20), lu32(&self.bytes, 16)),
        }
    }

    /// The transaction this record is a part of.
    pub fn transaction_id(&self) -> u32 {
        match self.version {
            WalVersion::V91 => lu32(&self.bytes, 12),
            WalVersion::V94 => lu32(&self.bytes, 4),
        }
    }

    /// The length of the record including header but excluding alignment.
    pub fn total_length(&self) -> u32 {
        match self.version {
            WalVersion::V91 => lu32(&self.bytes, 16),
            WalVersion::V94 => lu32(&self.bytes, 0),
        }
    }

    /// The length of resource manager specific data after the header.
    pub fn length(&self) -> u32 {
        match self.version {
            WalVersion::V91 => lu32(&self.bytes, 20),
            WalVersion::V94 => lu32(&self.bytes, 8),
        }
    }

    /// The resource manager specific info byte.
    pub fn info(&self) -> u8 {
        let index = match self.version {
            WalVersion::V91 => 24,
            WalVersion::V94 => 12,
        };
        self.bytes.get(index).copied().unwrap_or(0)
    }

    /// The id of the resource manager that created this record.
    pub fn resource_manager_id(&self) -> u8 {
        let index = match self.version {
            WalVersion::V91 => 25,
            WalVersion::V94 => 13,
        };
        self.bytes.get(index).copied().unwrap_or(0)
    }

    /// Whether the record carries the init-page flag.
    pub fn is_init(&self) -> bool {
        self.info() & 0x80 != 0
    }

    /// How the resource data of this record should be interpreted.
    pub fn record_type(&self) -> RecordType {
        let combined = (self.resource_manager_id() as u16) << 8 | (self.info() & 0x70) as u16;
        match combined {
            0x0100 => RecordType::Commit,
            0x0120 => RecordType::Abort,
            0x0A00 => RecordType::Insert,
            0x0A10 => RecordType::Delete,
            0x0A20 => RecordType::Update,
            0x0A40 => RecordType::Update, // heap-only-tuple update
            0x0A50 => RecordType::MultiInsert,
            _ => RecordType::Unknown,
        }
    }

    /// The size of the header in bytes.
    pub const fn size(&self) -> u64 {
        self.version.header_size()
    }

    /// The size of the header plus the alignment that follows it.
    pub fn aligned_size(&self) -> u64 {
        let aligned_start = self.read_from.aligned();
        aligned_start
            .add(self.size())
            .aligned()
            .difference(aligned_start)
    }
}
