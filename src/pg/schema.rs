//! The live-database capability trait used for population.
//!
//! The populator and the relation filter need a handful of lookups against
//! the live server: name resolution, the current row behind a tuple
//! address, and the replication replay position. This module defines that
//! capability set; wiring it to actual connections is the caller's concern.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

/// The replay location reported when the server is not in recovery.
///
/// Comparing any LSN against this value always succeeds, which disables the
/// populator's catch-up wait on primary-mode deployments.
pub const NOT_IN_RECOVERY: u64 = u64::MAX;

/// A column of a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaField {
    /// Column name.
    pub column: String,
    /// SQL data type name.
    pub data_type: String,
    /// Character or numeric size limit, 0 when the type has none.
    pub size: u32,
}

impl SchemaField {
    /// The rendered kind of the column: `type` or `type(size)`.
    pub fn kind(&self) -> String {
        if self.size == 0 {
            self.data_type.clone()
        } else {
            format!("{}({})", self.data_type, self.size)
        }
    }
}

impl fmt::Display for SchemaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind())
    }
}

/// Errors from schema and row lookups.
///
/// These never abort the pipeline; the populator stores their rendered form
/// on the message that triggered them.
#[derive(Debug)]
pub enum SchemaError {
    /// A name or field lookup failed.
    Lookup(String),

    /// No row exists at the requested tuple address.
    NoResults {
        /// The relation queried.
        relation: String,
        /// Page number of the tuple address.
        block: u32,
        /// Item number of the tuple address.
        offset: u16,
    },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::Lookup(message) => f.write_str(message),
            SchemaError::NoResults {
                relation,
                block,
                offset,
            } => write!(
                f,
                "failed to parse values rows: no results '{}'::({},{})",
                relation, block, offset
            ),
        }
    }
}

impl std::error::Error for SchemaError {}

/// Lookups against the live database backing the WAL being tailed.
///
/// Implementations serialize queries per database and are shared read-only
/// between the populator and the relation filter.
#[async_trait]
pub trait SchemaReader: Send + Sync {
    /// The highest replayed LSN, packed as `(logid << 32) | offset`.
    ///
    /// Returns [`NOT_IN_RECOVERY`] when the server is not in recovery.
    async fn latest_replay_location(&self) -> u64;

    /// The name of a database, empty when unknown.
    async fn get_database_name(&self, database_id: u32) -> String;

    /// The namespace and table names of a relation, empty when unknown.
    async fn get_namespace_and_table(&self, database_id: u32, relation_id: u32)
        -> (String, String);

    /// The current row at a physical tuple address, as rendered strings in
    /// column order.
    ///
    /// `Ok(None)` means the database or relation is unknown to this reader;
    /// errors carry the reason a known relation could not be read.
    async fn get_field_values(
        &self,
        database_id: u32,
        relation_id: u32,
        block: u32,
        offset: u16,
    ) -> Result<Option<Vec<(SchemaField, String)>>, SchemaError>;

    /// Resolves `db.ns.table` names to relation ids.
    async fn convert_rel_names_to_ids(&self, names: &[String]) -> HashMap<u32, String>;

    /// Whether this reader has any connection for the database.
    async fn have_connection_to_db(&self, database_id: u32) -> bool;
}

/// A reader with no connections at all.
///
/// Every lookup comes back empty and the replay location reads as not in
/// recovery, so the pipeline tails the WAL without populating rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSchemaReader;

#[async_trait]
impl SchemaReader for NullSchemaReader {
    async fn latest_replay_location(&self) -> u64 {
        NOT_IN_RECOVERY
    }

    async fn get_database_name(&self, _database_id: u32) -> String {
        String::new()
    }

    async fn get_namespace_and_table(
        &self,
        _database_id: u32,
        _relation_id: u32,
    ) -> (String, String) {
        (String::new(), String::new())
    }

    async fn get_field_values(
        &self,
        _database_id: u32,
        _relation_id: u32,
        _block: u32,
        _offset: u16,
    ) -> Result<Option<Vec<(SchemaField, String)>>, SchemaError> {
        Ok(None)
    }

    async fn convert_rel_names_to_ids(&self, _names: &[String]) -> HashMap<u32, String> {
        HashMap::new()
    }

    async fn have_connection_to_db(&self, _database_id: u32) -> bool {
        false
    }
}
