//! The `global/pg_control` cluster state file.
//!
//! The control file is a little-endian binary structure: the system
//! identifier and a format version come first, and the remaining field list
//! depends on that version. Two versions are understood, matching the two
//! record-header formats the WAL cursor reads:
//!
//! - 903 (PostgreSQL 9.1)
//! - 942 (PostgreSQL 9.4)
//!
//! Fields are packed; alignment holes present in the on-disk struct appear
//! here as explicit padding bytes.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Control file version written by PostgreSQL 9.1.
pub const PG_CONTROL_VERSION_91: u32 = 903;

/// Control file version written by PostgreSQL 9.4.
pub const PG_CONTROL_VERSION_94: u32 = 942;

/// The state the database cluster was in when the control file was written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PgState(pub u64);

impl fmt::Display for PgState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            0 => "starting up",
            1 => "shut down",
            2 => "shut down in recovery",
            3 => "shutting down",
            4 => "in crash recovery",
            5 => "in archive recovery",
            6 => "in production",
            _ => "unrecognized status code",
        };
        f.write_str(name)
    }
}

/// How detailed the write-ahead log is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalLevel(pub i32);

impl fmt::Display for WalLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            0 => "minimal",
            1 => "archive",
            2 => "hot_standby",
            3 => "logical",
            _ => "unrecognized wal_level",
        };
        f.write_str(name)
    }
}

/// The copy of the latest checkpoint record stored in the control file.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CheckPoint {
    pub redo_log_id: u32,
    pub redo_record_offset: u32,
    pub this_timeline_id: u32,
    pub prev_timeline_id: u32,
    pub full_page_writes: u8,
    pub next_xid_epoch: u32,
    pub next_xid: u32,
    pub next_oid: u32,
    pub next_multi: u32,
    pub next_multi_offset: u32,
    pub oldest_xid: u32,
    pub oldest_xid_db: u32,
    pub oldest_multi: u32,
    pub oldest_multi_db: u32,
    pub time: i64,
    pub oldest_active_xid: u32,
}

/// Runtime constants and checkpoint locations of a PostgreSQL cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Control {
    pub system_identifier: u64,
    pub version: u32,
    pub catalog_version_no: u32,

    pub state: PgState,
    pub time: i64,
    pub check_point_log_id: u32,
    pub check_point_record_offset: u32,
    pub prev_check_point_log_id: u32,
    pub prev_check_point_record_offset: u32,

    pub check_point_copy: CheckPoint,
    pub unlogged_lsn_log_id: u32,
    pub unlogged_lsn_record_offset: u32,

    pub min_recovery_point_log_id: u32,
    pub min_recovery_point_record_offset: u32,
    pub min_recovery_point_tli: u32,
    pub backup_start_point_log_id: u32,
    pub backup_start_point_record_offset: u32,
    pub backup_end_point_log_id: u32,
    pub backup_end_point_record_offset: u32,
    pub backup_end_required: u8,

    pub wal_level: WalLevel,
    pub wal_log_hints: u8,
    pub max_connections: i32,
    pub max_worker_processes: i32,
    pub max_prepared_xacts: i32,
    pub max_locks_per_xact: i32,
    pub track_commit_timestamp: u32,

    pub max_align: u32,
    pub float_format: f64,

    pub blcksz: u32,
    pub relseg_size: u32,

    pub xlog_blcksz: u32,
    pub xlog_seg_size: u32,

    pub name_data_len: u32,
    pub index_max_keys: u32,

    pub toast_max_chunk_size: u32,
    pub loblksize: u32,

    pub enable_int_times: u8,
    pub float4_by_val: u8,
    pub float8_by_val: u8,

    pub data_checksum_version: u32,

    pub crc: u32,
}

/// Errors from reading or parsing the control file.
#[derive(Debug)]
pub enum ControlError {
    /// The file could not be read.
    Io {
        /// Path of the control file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The file ended before a field could be read.
    Truncated(&'static str),

    /// The control file version is not one of the understood formats.
    UnknownVersion(u32),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::Io { path, source } => {
                write!(f, "failed to read {:?}: {}", path, source)
            }
            ControlError::Truncated(field) => write!(f, "failed to read {}", field),
            ControlError::UnknownVersion(version) => write!(f, "unknown version {}", version),
        }
    }
}

impl std::error::Error for ControlError {}

impl Control {
    /// Reads the control file from its default location under a data
    /// directory.
    pub async fn from_data_dir(data_dir: impl AsRef<Path>) -> Result<Control, ControlError> {
        Self::from_file(data_dir.as_ref().join("global").join("pg_control")).await
    }

    /// Reads the control file from a specific path.
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Control, ControlError> {
        let path = path.into();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| ControlError::Io { path, source })?;
        Self::from_bytes(&bytes)
    }

    /// Parses the control structure out of raw file contents.
    pub fn from_bytes(bytes: &[u8]) -> Result<Control, ControlError> {
        let mut fields = Fields(bytes);
        let mut control = Control {
            system_identifier: fields.u64("Database system identifier")?,
            version: fields.u32("pg_control version number")?,
            ..Control::default()
        };

        match control.version {
            PG_CONTROL_VERSION_91 => parse_v91(&mut fields, &mut control)?,
            PG_CONTROL_VERSION_94 => parse_v94(&mut fields, &mut control)?,
            other => return Err(ControlError::UnknownVersion(other)),
        }

        Ok(control)
    }
}

/// Sequential little-endian field reads with truncation checks.
struct Fields<'a>(&'a [u8]);

impl Fields<'_> {
    fn take(&mut self, n: usize, field: &'static str) -> Result<&[u8], ControlError> {
        if self.0.len() < n {
            return Err(ControlError::Truncated(field));
        }
        let (head, rest) = self.0.split_at(n);
        self.0 = rest;
        Ok(head)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, ControlError> {
        Ok(self.take(1, field)?[0])
    }

    fn pad(&mut self, n: usize) -> Result<(), ControlError> {
        self.take(n, "padding byte")?;
        Ok(())
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, ControlError> {
        let b = self.take(4, field)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self, field: &'static str) -> Result<i32, ControlError> {
        Ok(self.u32(field)? as i32)
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, ControlError> {
        let b = self.take(8, field)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn i64(&mut self, field: &'static str) -> Result<i64, ControlError> {
        Ok(self.u64(field)? as i64)
    }

    fn f64(&mut self, field: &'static str) -> Result<f64, ControlError> {
        Ok(f64::from_bits(self.u64(field)?))
    }
}

fn parse_v91(f: &mut Fields<'_>, c: &mut Control) -> Result<(), ControlError> {
    c.catalog_version_no = f.u32("catalog_version_no")?;
    c.state = PgState(f.u64("Database cluster state")?);
    c.time = f.i64("pg_control last modified time")?;
    c.check_point_log_id = f.u32("log id of Latest checkpoint location")?;
    c.check_point_record_offset = f.u32("record offset of Latest checkpoint location")?;
    c.prev_check_point_log_id = f.u32("log id of Prior checkpoint location")?;
    c.prev_check_point_record_offset = f.u32("record offset of Prior checkpoint location")?;
    c.check_point_copy.redo_log_id = f.u32("log id of Latest checkpoint's REDO location")?;
    c.check_point_copy.redo_record_offset =
        f.u32("record offset of Latest checkpoint's REDO location")?;
    c.check_point_copy.this_timeline_id = f.u32("Latest checkpoint's TimeLineID")?;
    c.check_point_copy.next_xid = f.u32("Latest checkpoint's NextXID")?;
    c.check_point_copy.next_xid_epoch = f.u32("Latest checkpoint's NextXID epoch")?;
    c.check_point_copy.next_oid = f.u32("Latest checkpoint's NextOID")?;
    c.check_point_copy.next_multi = f.u32("Latest checkpoint's NextMultiXactId")?;
    c.check_point_copy.next_multi_offset = f.u32("Latest checkpoint's NextMultiOffset")?;
    c.check_point_copy.oldest_xid = f.u32("Latest checkpoint's oldestXID")?;
    c.check_point_copy.oldest_xid_db = f.u32("Latest checkpoint's oldestXID's DB")?;
    c.check_point_copy.time = f.i64("Time of latest checkpoint")?;
    c.check_point_copy.oldest_active_xid = f.u32("Latest checkpoint's oldestActiveXID")?;
    c.min_recovery_point_log_id = f.u32("log id of Minimum recovery ending location")?;
    c.min_recovery_point_record_offset =
        f.u32("record offset of Minimum recovery ending location")?;
    c.backup_start_point_log_id = f.u32("log id of Backup start location")?;
    c.backup_start_point_record_offset = f.u32("record offset of Backup start location")?;
    c.wal_level = WalLevel(f.i32("Current wal_level setting")?);
    f.pad(4)?;
    c.max_connections = f.i32("Current max_connections setting")?;
    c.max_prepared_xacts = f.i32("Current max_prepared_xacts setting")?;
    c.max_locks_per_xact = f.i32("current max_locks_per_xact setting")?;
    c.max_align = f.u32("Maximum data alignment")?;
    c.track_commit_timestamp = f.u32("track_commit_timestamp")?;
    c.float_format = f.f64("float format")?;
    c.blcksz = f.u32("database block size")?;
    c.relseg_size = f.u32("Blocks per segment of large relation")?;
    c.xlog_blcksz = f.u32("WAL block size")?;
    c.xlog_seg_size = f.u32("Bytes per WAL segment")?;
    c.name_data_len = f.u32("Maximum length of identifiers")?;
    c.index_max_keys = f.u32("Maximum columns in an index")?;
    c.toast_max_chunk_size = f.u32("Maximum size of a TOAST chunk")?;
    c.enable_int_times = f.u8("enable integer times")?;
    c.float4_by_val = f.u8("float4 by value")?;
    c.float8_by_val = f.u8("float8 by value")?;
    f.pad(1)?;
    c.data_checksum_version = f.u32("data checksum version")?;
    c.crc = f.u32("crc")?;
    Ok(())
}

fn parse_v94(f: &mut Fields<'_>, c: &mut Control) -> Result<(), ControlError> {
    c.catalog_version_no = f.u32("catalog_version_no")?;
    c.state = PgState(f.u64("Database cluster state")?);
    c.time = f.i64("pg_control last modified time")?;
    c.check_point_record_offset = f.u32("record offset of Latest checkpoint location")?;
    c.check_point_log_id = f.u32("log id of Latest checkpoint location")?;
    c.prev_check_point_record_offset = f.u32("record offset of Prior checkpoint location")?;
    c.prev_check_point_log_id = f.u32("log id of Prior checkpoint location")?;
    c.check_point_copy.redo_record_offset =
        f.u32("record offset of Latest checkpoint's REDO location")?;
    c.check_point_copy.redo_log_id = f.u32("log id of Latest checkpoint's REDO location")?;
    c.check_point_copy.this_timeline_id = f.u32("Latest checkpoint's TimeLineID")?;
    c.check_point_copy.prev_timeline_id = f.u32("Latest checkpoint's prev TimeLineID")?;
    c.check_point_copy.full_page_writes = f.u8("Latest checkpoint's FullPageWrites")?;
    f.pad(3)?;
    c.check_point_copy.next_xid_epoch = f.u32("Latest checkpoint's NextXID epoch")?;
    c.check_point_copy.next_xid = f.u32("Latest checkpoint's NextXID")?;
    c.check_point_copy.next_oid = f.u32("Latest checkpoint's NextOID")?;
    c.check_point_copy.next_multi = f.u32("Latest checkpoint's NextMultiXactId")?;
    c.check_point_copy.next_multi_offset = f.u32("Latest checkpoint's NextMultiOffset")?;
    c.check_point_copy.oldest_xid = f.u32("Latest checkpoint's oldestXID")?;
    c.check_point_copy.oldest_xid_db = f.u32("Latest checkpoint's oldestXID's DB")?;
    c.check_point_copy.oldest_multi = f.u32("Latest checkpoint's OldestMulti")?;
    c.check_point_copy.oldest_multi_db = f.u32("Latest checkpoint's OldestMultiDB")?;
    c.check_point_copy.time = f.i64("Time of latest checkpoint")?;
    c.check_point_copy.oldest_active_xid = f.u32("Latest checkpoint's oldestActiveXID")?;
    f.pad(4)?;
    c.unlogged_lsn_record_offset = f.u32("record offset of unlogged LSN")?;
    c.unlogged_lsn_log_id = f.u32("log id of unlogged LSN")?;
    c.min_recovery_point_record_offset =
        f.u32("record offset of Minimum recovery ending location")?;
    c.min_recovery_point_log_id = f.u32("log id of Minimum recovery ending location")?;
    c.min_recovery_point_tli = f.u32("Minimum recovery timeline ID")?;
    f.pad(4)?;
    c.backup_start_point_record_offset = f.u32("record offset of Backup start location")?;
    c.backup_start_point_log_id = f.u32("log id of Backup start location")?;
    c.backup_end_point_record_offset = f.u32("record offset of Backup end location")?;
    c.backup_end_point_log_id = f.u32("log id of Backup end location")?;
    c.backup_end_required = f.u8("Backup end required")?;
    f.pad(3)?;
    c.wal_level = WalLevel(f.i32("Current wal_level setting")?);
    c.wal_log_hints = f.u8("wal log hints")?;
    f.pad(3)?;
    c.max_connections = f.i32("Current max_connections setting")?;
    c.max_worker_processes = f.i32("Current max_worker_processes setting")?;
    c.max_prepared_xacts = f.i32("Current max_prepared_xacts setting")?;
    c.max_locks_per_xact = f.i32("current max_locks_per_xact setting")?;
    c.max_align = f.u32("Maximum data alignment")?;
    c.float_format = f.f64("float format")?;
    c.blcksz = f.u32("database block size")?;
    c.relseg_size = f.u32("Blocks per segment of large relation")?;
    c.xlog_blcksz = f.u32("WAL block size")?;
    c.xlog_seg_size = f.u32("Bytes per WAL segment")?;
    c.name_data_len = f.u32("Maximum length of identifiers")?;
    c.index_max_keys = f.u32("Maximum columns in an index")?;
    c.toast_max_chunk_size = f.u32("Maximum size of a TOAST chunk")?;
    c.loblksize = f.u32("chunk size in pg_largeobject")?;
    c.enable_int_times = f.u8("enable integer times")?;
    c.float4_by_val = f.u8("float4 by value")?;
    c.float8_by_val = f.u8("float8 by value")?;
    c.data_checksum_version = f.u32("data checksum version")?;
    c.crc = f.u32("crc")?;
    Ok(())
}
