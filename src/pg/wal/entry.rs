//! Entries: the flattened, serializable form of interesting WAL records.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use chrono::Utc;

use super::body::RecordBody;
use super::heap::parse_heap_data;
use super::location::Location;
use super::page::Page;
use super::record::{RecordHeader, RecordType};

/// Size in bytes of the entry wire form.
pub const ENTRY_BYTES_SIZE: usize = 61;

/// The data extracted from one insert/update/delete/commit record.
///
/// An entry is what crosses the stage boundary out of the cursor: plain
/// ids and tuple addresses, no references into page buffers. Entries
/// serialize to a fixed 61-byte big-endian layout for the transaction
/// buffer's spill files:
///
/// ```text
/// type:1 | read_from:8 | prev:8 | tli:4 | log:4 | xid:4 | tbs:4 | db:4 |
/// rel:4 | from_block:4 | from_offset:2 | to_block:4 | to_offset:2 | parse_time:8
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    pub record_type: RecordType,
    pub read_from: Location,
    pub previous: Location,
    pub timeline_id: u32,
    pub log_id: u32,
    pub transaction_id: u32,
    pub tablespace_id: u32,
    pub database_id: u32,
    pub relation_id: u32,
    pub from_block: u32,
    pub from_offset: u16,
    pub to_block: u32,
    pub to_offset: u16,
    /// Nanoseconds since the epoch at which the entry was parsed.
    pub parse_time: i64,
}

impl Entry {
    /// Builds the entries for one record.
    ///
    /// Most record types produce exactly one entry; a multi-insert produces
    /// one per inserted tuple.
    pub fn from_record(page: &Page, header: &RecordHeader, body: &RecordBody) -> Vec<Entry> {
        let base = Entry {
            record_type: header.record_type(),
            read_from: header.read_from(),
            previous: header.previous(),
            timeline_id: page.timeline_id(),
            log_id: page.location().log_id(),
            transaction_id: header.transaction_id(),
            tablespace_id: 0,
            database_id: 0,
            relation_id: 0,
            from_block: 0,
            from_offset: 0,
            to_block: 0,
            to_offset: 0,
            parse_time: Utc::now().timestamp_nanos_opt().unwrap_or(0),
        };

        let heap_data = parse_heap_data(header.record_type(), header.is_init(), body.bytes());
        if heap_data.is_empty() {
            return vec![base];
        }

        heap_data
            .iter()
            .map(|data| Entry {
                tablespace_id: data.tablespace_id(),
                database_id: data.database_id(),
                relation_id: data.relation_id(),
                from_block: data.from_block(),
                from_offset: data.from_offset(),
                to_block: data.to_block(),
                to_offset: data.to_offset(),
                ..base
            })
            .collect()
    }

    /// Serializes the entry to its 61-byte wire form.
    pub fn to_bytes(&self) -> [u8; ENTRY_BYTES_SIZE] {
        let mut bs = BytesMut::with_capacity(ENTRY_BYTES_SIZE);
        bs.put_u8(self.record_type.as_u8());
        bs.put_u64(self.read_from.offset());
        bs.put_u64(self.previous.offset());
        bs.put_u32(self.timeline_id);
        bs.put_u32(self.log_id);
        bs.put_u32(self.transaction_id);
        bs.put_u32(self.tablespace_id);
        bs.put_u32(self.database_id);
        bs.put_u32(self.relation_id);
        bs.put_u32(self.from_block);
        bs.put_u16(self.from_offset);
        bs.put_u32(self.to_block);
        bs.put_u16(self.to_offset);
        bs.put_u64(self.parse_time as u64);

        let mut out = [0u8; ENTRY_BYTES_SIZE];
        out.copy_from_slice(&bs);
        out
    }

    /// Reconstructs an entry from its wire form.
    ///
    /// Locations come back with the default geometry. Returns `None` when
    /// fewer than [`ENTRY_BYTES_SIZE`] bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Option<Entry> {
        if bytes.len() < ENTRY_BYTES_SIZE {
            return None;
        }

        let mut bs = bytes;
        Some(Entry {
            record_type: RecordType::from_u8(bs.get_u8()),
            read_from: Location::with_defaults(bs.get_u64()),
            previous: Location::with_defaults(bs.get_u64()),
            timeline_id: bs.get_u32(),
            log_id: bs.get_u32(),
            transaction_id: bs.get_u32(),
            tablespace_id: bs.get_u32(),
            database_id: bs.get_u32(),
            relation_id: bs.get_u32(),
            from_block: bs.get_u32(),
            from_offset: bs.get_u16(),
            to_block: bs.get_u32(),
            to_offset: bs.get_u16(),
            parse_time: bs.get_u64() as i64,
        })
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.record_type {
            RecordType::Insert | RecordType::MultiInsert => write!(
                f,
                "Insert into {}/{}/{}::({},{}) on transaction id {} read from {}/{}",
                self.tablespace_id,
                self.database_id,
                self.relation_id,
                self.to_block,
                self.to_offset,
                self.transaction_id,
                self.timeline_id,
                self.read_from
            ),
            RecordType::Update => write!(
                f,
                "Update in {}/{}/{}::({},{})->({},{}) on transaction id {} read from {}/{}",
                self.tablespace_id,
                self.database_id,
                self.relation_id,
                self.from_block,
                self.from_offset,
                self.to_block,
                self.to_offset,
                self.transaction_id,
                self.timeline_id,
                self.read_from
            ),
            RecordType::Delete => write!(
                f,
                "Delete from {}/{}/{}::({},{}) on transaction id {} read from {}/{}",
                self.tablespace_id,
                self.database_id,
                self.relation_id,
                self.from_block,
                self.from_offset,
                self.transaction_id,
                self.timeline_id,
                self.read_from
            ),
            RecordType::Commit => write!(
                f,
                "Commit of transaction id {} read from {}/{}",
                self.transaction_id, self.timeline_id, self.read_from
            ),
            RecordType::Abort => write!(
                f,
                "Abort of transaction id {} read from {}/{}",
                self.transaction_id, self.timeline_id, self.read_from
            ),
            RecordType::Unknown => write!(
                f,
                "Unknown WAL Entry read from {}/{}",
                self.timeline_id, self.read_from
            ),
        }
    }
}
