//! Cursors over the write-ahead log.

use std::fmt;
use std::path::Path;

use super::block::BlockReader;
use super::body::RecordBody;
use super::entry::Entry;
use super::error::WalError;
use super::location::Location;
use super::page::Page;
use super::record::{RecordHeader, RecordType};
use crate::pg::control::Control;

/// A position in the WAL of a PostgreSQL system.
///
/// A cursor is a value: reading never mutates it, it returns the entries
/// found plus the cursor to continue from. PostgreSQL does not terminate
/// records, so a record is only trusted once a *next* record is found whose
/// back-pointer names it; until then the reader stays put. Commit and abort
/// records are the exception: they are handed out even when unconfirmed,
/// because at the live tail of the log nothing may follow them for a while.
#[derive(Debug, Clone)]
pub struct Cursor {
    location: Location,
    reader: BlockReader,
}

impl Cursor {
    /// Positions a cursor at the latest checkpoint recorded in the control
    /// file under `data_dir`.
    pub async fn at_checkpoint(data_dir: impl AsRef<Path>) -> Result<Cursor, WalError> {
        let data_dir = data_dir.as_ref();
        let control = Control::from_data_dir(data_dir).await?;
        Ok(Self::from_control(
            data_dir,
            &control,
            control.check_point_log_id,
            control.check_point_record_offset,
        ))
    }

    /// Positions a cursor at the checkpoint before the latest one.
    pub async fn at_prev_checkpoint(data_dir: impl AsRef<Path>) -> Result<Cursor, WalError> {
        let data_dir = data_dir.as_ref();
        let control = Control::from_data_dir(data_dir).await?;
        Ok(Self::from_control(
            data_dir,
            &control,
            control.prev_check_point_log_id,
            control.prev_check_point_record_offset,
        ))
    }

    fn from_control(data_dir: &Path, control: &Control, log_id: u32, offset: u32) -> Cursor {
        let location = Location::new(
            ((log_id as u64) << 32) + offset as u64,
            control.check_point_copy.this_timeline_id,
            control.xlog_seg_size,
            control.xlog_blcksz,
            control.max_align,
        );
        let reader = BlockReader::new(data_dir, control.xlog_blcksz, control.max_align);
        Cursor { location, reader }
    }

    /// Creates a cursor at an arbitrary location.
    pub fn at(location: Location, reader: BlockReader) -> Cursor {
        Cursor { location, reader }
    }

    /// The location this cursor points at.
    pub const fn location(&self) -> Location {
        self.location
    }

    /// The same cursor pointed at another location, valid or not.
    pub fn move_to(&self, location: Location) -> Cursor {
        Cursor {
            location,
            reader: self.reader.clone(),
        }
    }

    /// Reads the record at the current location.
    ///
    /// On success returns the entries the record expands to (one for most
    /// record types, one per tuple for a multi-insert) and the cursor for
    /// the *next* record. An empty vector with an unmoved cursor means the
    /// record could not be read or confirmed yet; an unconfirmed commit or
    /// abort is returned with the unmoved cursor.
    pub async fn read_entries(&self) -> Result<(Vec<Entry>, Cursor), WalError> {
        let block = self.reader.read_block(self.location).await?;
        let page = Page::new(block.clone());

        let Some(version) = page.version() else {
            return Ok((Vec::new(), self.clone()));
        };

        let Some(header) = RecordHeader::parse(&block, self.location, version, &self.reader).await?
        else {
            return Ok((Vec::new(), self.clone()));
        };

        let after_header = self.move_to(header.after_header());
        let mut body = RecordBody::new(&header);
        let mut bytes_read: u64 = 0;
        let mut cur = self.clone();

        if self.location.is_on_same_page_as(after_header.location) {
            bytes_read = body.append_body_after_header(&block, after_header.location);
            cur = after_header;
        }

        while !body.is_complete() {
            cur = cur.move_to(cur.location.start_of_next_page());

            let next_block = self.reader.read_block(cur.location).await?;
            let next_page = Page::new(next_block);

            cur = cur.move_to(cur.location.add(next_page.header_length()));

            bytes_read = body.append_continuation(&next_page);
            if bytes_read == 0 {
                return Ok((Vec::new(), self.clone()));
            }
        }

        let entries = Entry::from_record(&page, &header, &body);
        cur = cur.move_to(cur.location.add(bytes_read).aligned());

        match self.scan_for_record_with_previous(&cur, header.size()).await? {
            Some(next) => Ok((entries, next)),
            None => {
                let kind = header.record_type();
                if kind == RecordType::Commit || kind == RecordType::Abort {
                    Ok((entries, self.clone()))
                } else {
                    Ok((Vec::new(), self.clone()))
                }
            }
        }
    }

    /// Reads the record at the current location as a single entry.
    ///
    /// Same contract as [`Cursor::read_entries`], collapsed to the first
    /// entry of the expansion.
    pub async fn read_entry(&self) -> Result<(Option<Entry>, Cursor), WalError> {
        let (entries, next) = self.read_entries().await?;
        Ok((entries.into_iter().next(), next))
    }

    /// Finds the next record whose back-pointer names this cursor's record.
    async fn scan_for_record_with_previous(
        &self,
        start_at: &Cursor,
        record_header_size: u64,
    ) -> Result<Option<Cursor>, WalError> {
        if let Some(found) = self.same_page_scan(start_at).await? {
            return Ok(Some(found));
        }
        self.multi_page_scan(start_at, record_header_size).await
    }

    /// Scans alignment-sized steps within `start_at`'s page.
    async fn same_page_scan(&self, start_at: &Cursor) -> Result<Option<Cursor>, WalError> {
        let block = self.reader.read_block(start_at.location).await?;
        let page = Page::new(block.clone());
        let version = page.version();

        let mut cur = start_at.move_to(start_at.location.aligned());

        while cur.location.is_on_same_page_as(start_at.location) {
            if let Some(version) = version {
                let candidate =
                    RecordHeader::parse(&block, cur.location, version, &self.reader).await?;
                if let Some(header) = candidate {
                    if header.previous().offset() == self.location.offset() {
                        return Ok(Some(cur));
                    }
                }
            }

            cur = cur.move_to(cur.location.add(1).aligned());
        }

        Ok(None)
    }

    /// Advances page by page and tests the first record position found.
    async fn multi_page_scan(
        &self,
        start_at: &Cursor,
        record_header_size: u64,
    ) -> Result<Option<Cursor>, WalError> {
        let mut probe = start_at.clone();
        let cur = loop {
            probe = probe.move_to(probe.location.start_of_next_page());
            if let Some(first) = self.first_record_on_page(&probe, record_header_size).await? {
                break first;
            }
        };

        let block = self.reader.read_block(cur.location).await?;
        let page = Page::new(block.clone());

        if let Some(version) = page.version() {
            let candidate = RecordHeader::parse(&block, cur.location, version, &self.reader).await?;
            if let Some(header) = candidate {
                if header.previous().offset() == self.location.offset() {
                    return Ok(Some(cur));
                }
            }
        }

        Ok(None)
    }

    /// The position of the first record on a page, skipping the header and
    /// any continuation (with its 4-byte length word).
    ///
    /// Returns `None` when the continuation swallows the page or leaves no
    /// room for a record header.
    async fn first_record_on_page(
        &self,
        start_at: &Cursor,
        record_header_size: u64,
    ) -> Result<Option<Cursor>, WalError> {
        let block = self.reader.read_block(start_at.location).await?;
        let page = Page::new(block);

        let cur = start_at.move_to(start_at.location.start_of_page().add(page.header_length()));

        match page.continuation() {
            Some(cont) => {
                let after_cont = cur.location.add(cont.len() as u64 + 4).aligned();
                if after_cont.is_on_same_page_as(cur.location)
                    && after_cont.to_end_of_page() >= record_header_size
                {
                    Ok(Some(cur.move_to(after_cont)))
                } else {
                    Ok(None)
                }
            }
            None => Ok(Some(cur)),
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}{:016X}",
            self.location.timeline_id(),
            self.location.offset()
        )
    }
}
