//! Locations in the write-ahead log.

use std::fmt;

/// Default WAL segment file size (16 MiB).
pub const DEFAULT_FILE_SIZE: u32 = 16 * 1024 * 1024;

/// Default WAL page size (8 KiB).
pub const DEFAULT_PAGE_SIZE: u32 = 8 * 1024;

/// Default alignment word size.
pub const DEFAULT_WORD_SIZE: u32 = 8;

/// Default timeline id.
pub const DEFAULT_TIMELINE_ID: u32 = 1;

/// A 64-bit address in the WAL.
///
/// A location carries the geometry of the log it addresses (segment file
/// size, page size, and alignment word size) so that segment, page, and
/// alignment arithmetic need nothing beyond the value itself. The last
/// segment of each logical log (`0xFFFFFFFF / file_size`) is never written
/// by the server; [`Location::add`] and [`Location::subtract`] roll past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    offset: u64,
    timeline_id: u32,
    file_size: u32,
    page_size: u32,
    word_size: u32,
}

impl Location {
    /// Creates a location from an offset and explicit geometry.
    pub const fn new(
        offset: u64,
        timeline_id: u32,
        file_size: u32,
        page_size: u32,
        word_size: u32,
    ) -> Self {
        Self {
            offset,
            timeline_id,
            file_size,
            page_size,
            word_size,
        }
    }

    /// Creates a location from an offset with the common default geometry.
    pub const fn with_defaults(offset: u64) -> Self {
        Self::new(
            offset,
            DEFAULT_TIMELINE_ID,
            DEFAULT_FILE_SIZE,
            DEFAULT_PAGE_SIZE,
            DEFAULT_WORD_SIZE,
        )
    }

    /// Creates a location from the two halves of an LSN with default geometry.
    pub const fn from_u32s(high: u32, low: u32) -> Self {
        Self::with_defaults(((high as u64) << 32) + low as u64)
    }

    /// The raw offset this location is based on.
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// The timeline this location is found on.
    pub const fn timeline_id(&self) -> u32 {
        self.timeline_id
    }

    /// Size in bytes of one segment file of this log.
    pub const fn file_size(&self) -> u32 {
        self.file_size
    }

    /// Size in bytes of one page of this log.
    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Alignment word size of this log.
    pub const fn word_size(&self) -> u32 {
        self.word_size
    }

    /// The upper 32 bits of the offset.
    pub const fn log_id(&self) -> u32 {
        (self.offset >> 32) as u32
    }

    /// The lower 32 bits of the offset.
    pub const fn record_offset(&self) -> u32 {
        self.offset as u32
    }

    /// The segment id of the location within its logical log.
    pub const fn segment_id(&self) -> u32 {
        self.record_offset() / self.file_size
    }

    /// The name of the WAL segment file this location is in.
    pub fn filename(&self) -> String {
        format!(
            "{:08X}{:08X}{:08X}",
            self.timeline_id,
            self.log_id(),
            self.segment_id()
        )
    }

    /// Increases the offset by some amount, rolling past the last segment.
    pub fn add(self, amount: u64) -> Location {
        let mut out = Location {
            offset: self.offset + amount,
            ..self
        };
        let max_segments = 0xFFFF_FFFF / self.file_size;
        if out.segment_id() == max_segments {
            out = out.add(self.file_size as u64);
        }
        out
    }

    /// Decreases the offset by some amount, rolling past the last segment.
    pub fn subtract(self, amount: u64) -> Location {
        let mut out = Location {
            offset: self.offset - amount,
            ..self
        };
        let max_segments = 0xFFFF_FFFF / self.file_size;
        if out.segment_id() == max_segments {
            out = out.subtract(self.file_size as u64);
        }
        out
    }

    /// How much larger this offset is than another.
    pub const fn difference(&self, other: Location) -> u64 {
        self.offset - other.offset
    }

    /// Bytes from the start of the segment file to the location.
    pub const fn from_start_of_file(&self) -> u64 {
        self.offset % self.file_size as u64
    }

    /// Bytes from the start of the page to the location.
    pub const fn from_start_of_page(&self) -> u64 {
        self.from_start_of_file() % self.page_size as u64
    }

    /// Bytes from the location to the end of the segment file.
    pub const fn to_end_of_file(&self) -> u64 {
        self.file_size as u64 - self.from_start_of_file()
    }

    /// Bytes from the location to the end of the page.
    pub const fn to_end_of_page(&self) -> u64 {
        self.page_size as u64 - self.from_start_of_page()
    }

    /// The location of the first byte in the segment file this location is in.
    pub fn start_of_file(self) -> Location {
        self.subtract(self.from_start_of_file())
    }

    /// The location of the first byte of the next segment file.
    pub fn start_of_next_file(self) -> Location {
        self.start_of_file().add(self.file_size as u64)
    }

    /// The location of the first byte of the previous segment file.
    pub fn start_of_previous_file(self) -> Location {
        self.start_of_file().subtract(self.file_size as u64)
    }

    /// The location of the first byte in the page this location is in.
    pub fn start_of_page(self) -> Location {
        self.subtract(self.from_start_of_page())
    }

    /// The location of the first byte of the next page.
    pub fn start_of_next_page(self) -> Location {
        self.start_of_page().add(self.page_size as u64)
    }

    /// The location of the first byte of the previous page.
    pub fn start_of_previous_page(self) -> Location {
        self.start_of_page().subtract(self.page_size as u64)
    }

    /// Whether another location falls on the same page as this one.
    pub fn is_on_same_page_as(&self, other: Location) -> bool {
        self.start_of_page() == other.start_of_page()
    }

    /// The location rounded up to the next multiple of the word size.
    ///
    /// Idempotent: an aligned location aligns to itself.
    pub fn aligned(self) -> Location {
        let r = self.offset % self.word_size as u64;
        if r != 0 {
            self.add(self.word_size as u64 - r)
        } else {
            self
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halves_roundtrip() {
        let loc = Location::from_u32s(0x12, 0x0100_0000);
        assert_eq!(loc.log_id(), 0x12);
        assert_eq!(loc.record_offset(), 0x0100_0000);
        assert_eq!(loc.offset(), 0x12_0100_0000);
    }

    #[test]
    fn test_filename() {
        let loc = Location::from_u32s(2, 3 * DEFAULT_FILE_SIZE + 17);
        assert_eq!(loc.segment_id(), 3);
        assert_eq!(loc.filename(), "000000010000000200000003");
    }

    #[test]
    fn test_aligned_rounds_up_to_word() {
        let expected = [0u64, 8, 8, 8, 8, 8, 8, 8];
        for (offset, want) in expected.iter().enumerate() {
            let loc = Location::with_defaults(offset as u64);
            assert_eq!(loc.aligned().offset(), *want, "offset {}", offset);
        }
    }

    #[test]
    fn test_aligned_is_idempotent() {
        for offset in 0..64u64 {
            let once = Location::with_defaults(offset).aligned();
            assert_eq!(once.aligned(), once);
            assert_eq!(once.offset() % DEFAULT_WORD_SIZE as u64, 0);
        }
    }

    #[test]
    fn test_start_of_page_is_idempotent() {
        let loc = Location::with_defaults(3 * 8192 + 1234);
        let start = loc.start_of_page();
        assert_eq!(start.offset(), 3 * 8192);
        assert_eq!(start.start_of_page(), start);
    }

    #[test]
    fn test_start_of_file_is_idempotent() {
        let loc = Location::with_defaults(5 * DEFAULT_FILE_SIZE as u64 + 9999);
        let start = loc.start_of_file();
        assert_eq!(start.offset(), 5 * DEFAULT_FILE_SIZE as u64);
        assert_eq!(start.start_of_file(), start);
    }

    #[test]
    fn test_page_boundaries() {
        let loc = Location::with_defaults(8192 + 100);
        assert_eq!(loc.from_start_of_page(), 100);
        assert_eq!(loc.to_end_of_page(), 8192 - 100);
        assert_eq!(loc.start_of_next_page().offset(), 2 * 8192);
        assert_eq!(loc.start_of_previous_page().offset(), 0);
        assert!(loc.is_on_same_page_as(Location::with_defaults(8192)));
        assert!(!loc.is_on_same_page_as(Location::with_defaults(2 * 8192)));
    }

    #[test]
    fn test_add_subtract_inverse() {
        for &offset in &[0u64, 17, 8192, 0xFF_FFFF, 0x1_0000_0000] {
            for &amount in &[1u64, 8, 4096, 65536] {
                let loc = Location::with_defaults(offset);
                assert_eq!(loc.add(amount).subtract(amount), loc);
            }
        }
    }

    #[test]
    fn test_add_rolls_past_last_segment() {
        // The last segment of a logical log is skipped entirely.
        let last_segment = (0xFFFF_FFFFu32 / DEFAULT_FILE_SIZE) as u64 * DEFAULT_FILE_SIZE as u64;
        let loc = Location::with_defaults(last_segment - 1);
        let bumped = loc.add(1);
        assert_eq!(bumped.offset(), last_segment + DEFAULT_FILE_SIZE as u64);
    }

    #[test]
    fn test_subtract_rolls_past_last_segment() {
        let last_segment = (0xFFFF_FFFFu32 / DEFAULT_FILE_SIZE) as u64 * DEFAULT_FILE_SIZE as u64;
        let above = Location::with_defaults(last_segment + DEFAULT_FILE_SIZE as u64);
        let dropped = above.subtract(1);
        assert_eq!(dropped.offset(), last_segment - 1);
    }
}
