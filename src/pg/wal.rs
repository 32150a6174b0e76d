//! Write-ahead log parsing.
//!
//! The WAL is a sequence of fixed-size segment files, each split into
//! fixed-size pages. Every page starts with a header; a record that does not
//! fit on its page continues onto the next page as a *continuation*. This
//! module navigates that layout:
//!
//! ```text
//! +-----------------------------+  segment file (16MB)
//! | page 0 | page 1 | ... | page N |
//! +-----------------------------+
//!    |
//!    v
//! +--------+---------------------+  page (8KB)
//! | header | continuation? | records ... |
//! +--------+---------------------+
//! ```
//!
//! - [`Location`]: a 64-bit address in the log plus its geometry
//! - [`BlockReader`]: loads one page from a segment file
//! - [`Page`]: byte view of a page header and its continuation
//! - [`RecordHeader`] / [`RecordBody`]: one unit of work in the log
//! - [`HeapData`]: heap resource manager payloads (insert/update/delete)
//! - [`Entry`]: the flattened, serializable form handed to the pipeline
//! - [`Cursor`]: reads entries and chains them via back-pointers

mod bits;
mod block;
mod body;
mod cursor;
mod entry;
mod error;
mod heap;
mod location;
mod page;
mod record;

pub use block::BlockReader;
pub use body::RecordBody;
pub use cursor::Cursor;
pub use entry::{Entry, ENTRY_BYTES_SIZE};
pub use error::WalError;
pub use heap::{parse_heap_data, HeapData};
pub use location::Location;
pub use page::{Page, WalVersion};
pub use record::{RecordHeader, RecordType};
