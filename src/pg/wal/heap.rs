//! Heap resource manager payloads.

use std::fmt;

use bytes::Bytes;

use super::bits::{lu16, lu32};
use super::record::RecordType;

/// Body flags bit: the tuples initialize a fresh heap page.
const XLOG_HEAP_INIT_PAGE: u8 = 0x80;

/// Heap details carried by the body of an insert/update/delete record.
///
/// All variants expose the same capability set: the (tablespace, database,
/// relation) triple and the source/destination tuple addresses. Fields that
/// do not apply to a variant read as zero.
#[derive(Debug, Clone)]
pub enum HeapData {
    /// A tuple inserted into a heap page.
    Insert(InsertData),
    /// A tuple updated in place or moved to a new page.
    Update(UpdateData),
    /// A tuple removed from a heap page.
    Delete(DeleteData),
    /// One of the tuples of a multi-insert record.
    MultiInsert(MultiInsertData),
}

impl HeapData {
    /// The id of the tablespace this tuple is found in.
    pub fn tablespace_id(&self) -> u32 {
        match self {
            HeapData::Insert(d) => d.tablespace_id(),
            HeapData::Update(d) => d.tablespace_id(),
            HeapData::Delete(d) => d.tablespace_id(),
            HeapData::MultiInsert(d) => d.tablespace_id,
        }
    }

    /// The id of the database this tuple is found in.
    pub fn database_id(&self) -> u32 {
        match self {
            HeapData::Insert(d) => d.database_id(),
            HeapData::Update(d) => d.database_id(),
            HeapData::Delete(d) => d.database_id(),
            HeapData::MultiInsert(d) => d.database_id,
        }
    }

    /// The id of the relation this tuple is found in.
    pub fn relation_id(&self) -> u32 {
        match self {
            HeapData::Insert(d) => d.relation_id(),
            HeapData::Update(d) => d.relation_id(),
            HeapData::Delete(d) => d.relation_id(),
            HeapData::MultiInsert(d) => d.relation_id,
        }
    }

    /// The page number the tuple moved from, when the variant has one.
    pub fn from_block(&self) -> u32 {
        match self {
            HeapData::Update(d) => d.from_block(),
            HeapData::Delete(d) => d.from_block(),
            _ => 0,
        }
    }

    /// The item number the tuple moved from, when the variant has one.
    pub fn from_offset(&self) -> u16 {
        match self {
            HeapData::Update(d) => d.from_offset(),
            HeapData::Delete(d) => d.from_offset(),
            _ => 0,
        }
    }

    /// The page number the tuple now resides on, when the variant has one.
    pub fn to_block(&self) -> u32 {
        match self {
            HeapData::Insert(d) => d.to_block(),
            HeapData::Update(d) => d.to_block(),
            HeapData::MultiInsert(d) => d.to_block,
            HeapData::Delete(_) => 0,
        }
    }

    /// The item number the tuple now resides at, when the variant has one.
    pub fn to_offset(&self) -> u16 {
        match self {
            HeapData::Insert(d) => d.to_offset(),
            HeapData::Update(d) => d.to_offset(),
            HeapData::MultiInsert(d) => d.to_offset,
            HeapData::Delete(_) => 0,
        }
    }
}

impl fmt::Display for HeapData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapData::Insert(_) => write!(
                f,
                "Insert in {}/{}/{} to ({},{})",
                self.tablespace_id(),
                self.database_id(),
                self.relation_id(),
                self.to_block(),
                self.to_offset()
            ),
            HeapData::Update(_) => write!(
                f,
                "Update in {}/{}/{} from ({},{}) to ({},{})",
                self.tablespace_id(),
                self.database_id(),
                self.relation_id(),
                self.from_block(),
                self.from_offset(),
                self.to_block(),
                self.to_offset()
            ),
            HeapData::Delete(_) => write!(
                f,
                "Delete in {}/{}/{} from ({},{})",
                self.tablespace_id(),
                self.database_id(),
                self.relation_id(),
                self.from_block(),
                self.from_offset()
            ),
            HeapData::MultiInsert(_) => write!(
                f,
                "MultiInsert in {}/{}/{} to ({},{})",
                self.tablespace_id(),
                self.database_id(),
                self.relation_id(),
                self.to_block(),
                self.to_offset()
            ),
        }
    }
}

/// Interprets a record body as heap data based on the record type.
///
/// Returns one element for insert/update/delete, one per tuple for
/// multi-insert, and nothing for record types without heap payloads.
pub fn parse_heap_data(record_type: RecordType, is_init: bool, data: &[u8]) -> Vec<HeapData> {
    match record_type {
        RecordType::Insert => vec![HeapData::Insert(InsertData(Bytes::copy_from_slice(data)))],
        RecordType::Update => vec![HeapData::Update(UpdateData(Bytes::copy_from_slice(data)))],
        RecordType::Delete => vec![HeapData::Delete(DeleteData(Bytes::copy_from_slice(data)))],
        RecordType::MultiInsert => parse_multi_insert(is_init, data),
        _ => Vec::new(),
    }
}

/// Heap body of an insert record.
///
/// Layout: `tbs:4 | db:4 | rel:4 | to_block:4 (split u16s) | to_offset:2`.
#[derive(Debug, Clone)]
pub struct InsertData(Bytes);

impl InsertData {
    pub fn tablespace_id(&self) -> u32 {
        lu32(&self.0, 0)
    }

    pub fn database_id(&self) -> u32 {
        lu32(&self.0, 4)
    }

    pub fn relation_id(&self) -> u32 {
        lu32(&self.0, 8)
    }

    pub fn to_block(&self) -> u32 {
        read_block_id(&self.0, 12)
    }

    pub fn to_offset(&self) -> u16 {
        lu16(&self.0, 16)
    }
}

/// Heap body of an update record.
///
/// Layout: `tbs:4 | db:4 | rel:4 | from_block:4 | from_offset:2 | pad:2 |
/// to_block:4 | to_offset:2`.
#[derive(Debug, Clone)]
pub struct UpdateData(Bytes);

impl UpdateData {
    pub fn tablespace_id(&self) -> u32 {
        lu32(&self.0, 0)
    }

    pub fn database_id(&self) -> u32 {
        lu32(&self.0, 4)
    }

    pub fn relation_id(&self) -> u32 {
        lu32(&self.0, 8)
    }

    pub fn from_block(&self) -> u32 {
        read_block_id(&self.0, 12)
    }

    pub fn from_offset(&self) -> u16 {
        lu16(&self.0, 16)
    }

    pub fn to_block(&self) -> u32 {
        read_block_id(&self.0, 20)
    }

    pub fn to_offset(&self) -> u16 {
        lu16(&self.0, 24)
    }
}

/// Heap body of a delete record.
///
/// Layout: `tbs:4 | db:4 | rel:4 | from_block:4 | from_offset:2`.
#[derive(Debug, Clone)]
pub struct DeleteData(Bytes);

impl DeleteData {
    pub fn tablespace_id(&self) -> u32 {
        lu32(&self.0, 0)
    }

    pub fn database_id(&self) -> u32 {
        lu32(&self.0, 4)
    }

    pub fn relation_id(&self) -> u32 {
        lu32(&self.0, 8)
    }

    pub fn from_block(&self) -> u32 {
        read_block_id(&self.0, 12)
    }

    pub fn from_offset(&self) -> u16 {
        lu16(&self.0, 16)
    }
}

/// One expanded tuple of a multi-insert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiInsertData {
    pub tablespace_id: u32,
    pub database_id: u32,
    pub relation_id: u32,
    pub to_block: u32,
    pub to_offset: u16,
}

/// Expands a multi-insert body into its tuples.
///
/// Layout: `tbs:4 | db:4 | rel:4 | to_block:4 | flags:1 | pad:1 |
/// ntuples:2 | offsets:2*n`. When the record (or body flags) carry the
/// init-page flag, the offsets array is absent and tuples take the item
/// numbers `1..=n`.
fn parse_multi_insert(is_init: bool, data: &[u8]) -> Vec<HeapData> {
    let tablespace_id = lu32(data, 0);
    let database_id = lu32(data, 4);
    let relation_id = lu32(data, 8);
    let to_block = lu32(data, 12);
    let flags = data.get(16).copied().unwrap_or(0);
    let ntuples = lu16(data, 18);

    let is_init = is_init || flags & XLOG_HEAP_INIT_PAGE > 0;

    let mut tuples = Vec::with_capacity(ntuples as usize);
    for i in 0..ntuples {
        let to_offset = if is_init {
            i + 1
        } else {
            lu16(data, (i as usize) * 2 + 20)
        };

        tuples.push(HeapData::MultiInsert(MultiInsertData {
            tablespace_id,
            database_id,
            relation_id,
            to_block,
            to_offset,
        }));
    }

    tuples
}

/// Reads a block id stored as two little-endian 16-bit halves.
fn read_block_id(bs: &Bytes, start: usize) -> u32 {
    (lu16(bs, start) as u32) << 16 | lu16(bs, start + 2) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn ids(bs: &mut BytesMut) {
        bs.put_u32_le(1663); // tablespace
        bs.put_u32_le(16384); // database
        bs.put_u32_le(16400); // relation
    }

    fn put_block_id(bs: &mut BytesMut, block: u32) {
        bs.put_u16_le((block >> 16) as u16);
        bs.put_u16_le(block as u16);
    }

    #[test]
    fn test_insert_body() {
        let mut bs = BytesMut::new();
        ids(&mut bs);
        put_block_id(&mut bs, 0x0001_0002);
        bs.put_u16_le(9);

        let data = parse_heap_data(RecordType::Insert, false, &bs);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].tablespace_id(), 1663);
        assert_eq!(data[0].database_id(), 16384);
        assert_eq!(data[0].relation_id(), 16400);
        assert_eq!(data[0].to_block(), 0x0001_0002);
        assert_eq!(data[0].to_offset(), 9);
        assert_eq!(data[0].from_block(), 0);
        assert_eq!(data[0].from_offset(), 0);
    }

    #[test]
    fn test_update_body() {
        let mut bs = BytesMut::new();
        ids(&mut bs);
        put_block_id(&mut bs, 3);
        bs.put_u16_le(7);
        bs.put_u16_le(0); // padding
        put_block_id(&mut bs, 4);
        bs.put_u16_le(8);

        let data = parse_heap_data(RecordType::Update, false, &bs);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].from_block(), 3);
        assert_eq!(data[0].from_offset(), 7);
        assert_eq!(data[0].to_block(), 4);
        assert_eq!(data[0].to_offset(), 8);
    }

    #[test]
    fn test_delete_body() {
        let mut bs = BytesMut::new();
        ids(&mut bs);
        put_block_id(&mut bs, 12);
        bs.put_u16_le(2);

        let data = parse_heap_data(RecordType::Delete, false, &bs);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].from_block(), 12);
        assert_eq!(data[0].from_offset(), 2);
        assert_eq!(data[0].to_block(), 0);
        assert_eq!(data[0].to_offset(), 0);
    }

    fn multi_insert_body(flags: u8, offsets: &[u16]) -> BytesMut {
        let mut bs = BytesMut::new();
        ids(&mut bs);
        bs.put_u32_le(77); // block, plain u32 here
        bs.put_u8(flags);
        bs.put_u8(0);
        bs.put_u16_le(offsets.len() as u16);
        for &offset in offsets {
            bs.put_u16_le(offset);
        }
        bs
    }

    #[test]
    fn test_multi_insert_offsets_from_array() {
        let bs = multi_insert_body(0, &[5, 9, 13]);
        let data = parse_heap_data(RecordType::MultiInsert, false, &bs);
        let offsets: Vec<u16> = data.iter().map(|d| d.to_offset()).collect();
        assert_eq!(offsets, vec![5, 9, 13]);
        assert!(data.iter().all(|d| d.to_block() == 77));
    }

    #[test]
    fn test_multi_insert_init_page_is_sequential() {
        // Offsets array absent; item numbers are implied.
        let bs = multi_insert_body(XLOG_HEAP_INIT_PAGE, &[]);
        let mut bs = bs;
        bs[18..20].copy_from_slice(&4u16.to_le_bytes());
        let data = parse_heap_data(RecordType::MultiInsert, false, &bs);
        let offsets: Vec<u16> = data.iter().map(|d| d.to_offset()).collect();
        assert_eq!(offsets, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_multi_insert_init_from_record_flag() {
        let bs = multi_insert_body(0, &[5, 9]);
        let data = parse_heap_data(RecordType::MultiInsert, true, &bs);
        let offsets: Vec<u16> = data.iter().map(|d| d.to_offset()).collect();
        assert_eq!(offsets, vec![1, 2]);
    }

    #[test]
    fn test_commit_has_no_heap_data() {
        assert!(parse_heap_data(RecordType::Commit, false, &[1, 2, 3]).is_empty());
        assert!(parse_heap_data(RecordType::Unknown, false, &[]).is_empty());
    }
}
