//! Transaction messages published to the consumer.
//!
//! A [`Transaction`] is one PostgreSQL commit: its keys and times plus
//! either the populated per-row [`Message`]s (small transactions) or the
//! set of [`Table`]s touched and a message count (oversize transactions).
//! The JSON shapes here are the crate's output contract.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::pg::wal::{Entry, RecordType};

/// A column of a populated message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Column name.
    #[serde(rename = "n", default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Rendered column type.
    #[serde(rename = "k", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Rendered column value.
    #[serde(rename = "v", default, skip_serializing_if = "String::is_empty")]
    pub value: String,
}

/// The kind of change a message describes.
///
/// Serialized as its numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    /// An unsupported WAL record.
    Unknown = 1,
    /// An insert statement.
    Insert = 2,
    /// A delete statement.
    Delete = 3,
    /// An update statement.
    Update = 4,
    /// A commit record.
    Commit = 5,
}

impl MessageType {
    const fn from_u32(value: u32) -> MessageType {
        match value {
            2 => MessageType::Insert,
            3 => MessageType::Delete,
            4 => MessageType::Update,
            5 => MessageType::Commit,
            _ => MessageType::Unknown,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Insert => "InsertMessage",
            MessageType::Delete => "DeleteMessage",
            MessageType::Update => "UpdateMessage",
            MessageType::Commit => "CommitMessage",
            MessageType::Unknown => "UnknownMessage",
        };
        f.write_str(name)
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(*self as u32)
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(MessageType::from_u32(u32::deserialize(deserializer)?))
    }
}

/// An LSN rendered as 24 uppercase hex characters:
/// `timeline || logid || offset`, 8 digits each.
///
/// Keys order lexicographically in WAL order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    /// The key before any other key.
    pub fn beginning() -> Key {
        Key("000000000000000000000000".to_string())
    }

    /// Builds a key from the parts of an LSN.
    pub fn new(timeline_id: u32, log_id: u32, offset: u32) -> Key {
        Key(format!("{:08X}{:08X}{:08X}", timeline_id, log_id, offset))
    }

    /// Builds the key naming where an entry was read from.
    pub fn for_entry(entry: &Entry) -> Key {
        Key::new(
            entry.timeline_id,
            entry.read_from.log_id(),
            entry.read_from.record_offset(),
        )
    }

    /// Wraps a non-validated string.
    pub fn from_string(s: impl Into<String>) -> Key {
        Key(s.into())
    }

    /// Splits the key back into (timeline, log id, record offset).
    pub fn parse(&self) -> Option<(u32, u32, u32)> {
        if self.0.len() != 24 {
            return None;
        }
        let timeline_id = u32::from_str_radix(&self.0[..8], 16).ok()?;
        let log_id = u32::from_str_radix(&self.0[8..16], 16).ok()?;
        let offset = u32::from_str_radix(&self.0[16..], 16).ok()?;
        Some((timeline_id, log_id, offset))
    }

    /// Whether this key comes earlier in the WAL than another.
    pub fn is_before(&self, other: &Key) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders a tuple address as `"(block,offset)"`.
pub fn tuple_id(block: u32, offset: u16) -> String {
    format!("({},{})", block, offset)
}

/// The fully addressable form of a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Table {
    #[serde(rename = "db")]
    pub database_name: String,
    #[serde(rename = "ns")]
    pub namespace: String,
    #[serde(rename = "rel")]
    pub relation: String,
}

impl Table {
    /// The full table address of the form `db.ns.table`.
    pub fn rel_full_name(&self) -> String {
        format!("{}.{}.{}", self.database_name, self.namespace, self.relation)
    }

    /// Splits a `db.ns.table` address back into a table.
    pub fn from_full_name(full_name: &str) -> Option<Table> {
        let mut parts = full_name.split('.');
        let table = Table {
            database_name: parts.next()?.to_string(),
            namespace: parts.next()?.to_string(),
            relation: parts.next()?.to_string(),
        };
        if parts.next().is_some() {
            return None;
        }
        Some(table)
    }
}

fn is_zero_u32(value: &u32) -> bool {
    *value == 0
}

fn is_zero_u64(value: &u64) -> bool {
    *value == 0
}

fn is_zero_i64(value: &i64) -> bool {
    *value == 0
}

fn is_zero_usize(value: &usize) -> bool {
    *value == 0
}

/// An individual populated committed postgres statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(skip)]
    pub timeline_id: u32,
    #[serde(skip)]
    pub log_id: u32,
    #[serde(skip)]
    pub record_offset: u32,
    #[serde(rename = "nsid", default, skip_serializing_if = "is_zero_u32")]
    pub tablespace_id: u32,
    #[serde(rename = "dbid", default, skip_serializing_if = "is_zero_u32")]
    pub database_id: u32,
    #[serde(rename = "relid", default, skip_serializing_if = "is_zero_u32")]
    pub relation_id: u32,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub key: Key,
    pub prev: Key,
    #[serde(rename = "xid")]
    pub transaction_id: u32,
    #[serde(rename = "db")]
    pub database_name: String,
    #[serde(rename = "ns")]
    pub namespace: String,
    #[serde(rename = "rel")]
    pub relation: String,
    #[serde(skip)]
    pub block: u32,
    #[serde(skip)]
    pub offset: u16,
    #[serde(rename = "ctid")]
    pub tuple_id: String,
    #[serde(rename = "prev_ctid", default, skip_serializing_if = "String::is_empty")]
    pub prev_tuple_id: String,
    pub fields: Vec<Field>,
    #[serde(
        rename = "population_error",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub population_error: String,
    pub populate_time: DateTime<Utc>,
    pub parse_time: DateTime<Utc>,
    #[serde(rename = "populate_wait", default, skip_serializing_if = "is_zero_u32")]
    pub populate_wait: u32,
    #[serde(rename = "lag", default, skip_serializing_if = "is_zero_u64")]
    pub populate_lag: u64,
    /// Population duration in nanoseconds.
    #[serde(
        rename = "populate_duration",
        default,
        skip_serializing_if = "is_zero_i64"
    )]
    pub populate_duration: i64,
}

impl Message {
    /// Maps a WAL entry to an unpopulated message.
    pub fn from_entry(entry: &Entry) -> Message {
        let parse_time = DateTime::from_timestamp_nanos(entry.parse_time);

        let (message_type, block, offset, prev_tuple_id) = match entry.record_type {
            RecordType::Insert | RecordType::MultiInsert => {
                (MessageType::Insert, entry.to_block, entry.to_offset, String::new())
            }
            RecordType::Update => (
                MessageType::Update,
                entry.to_block,
                entry.to_offset,
                tuple_id(entry.from_block, entry.from_offset),
            ),
            RecordType::Delete => (
                MessageType::Delete,
                entry.from_block,
                entry.from_offset,
                String::new(),
            ),
            RecordType::Commit => (MessageType::Commit, 0, 0, String::new()),
            _ => (MessageType::Unknown, 0, 0, String::new()),
        };

        Message {
            timeline_id: entry.timeline_id,
            log_id: entry.read_from.log_id(),
            record_offset: entry.read_from.record_offset(),
            tablespace_id: entry.tablespace_id,
            database_id: entry.database_id,
            relation_id: entry.relation_id,
            message_type,
            key: Key::for_entry(entry),
            prev: Key::new(
                entry.timeline_id,
                entry.previous.log_id(),
                entry.previous.record_offset(),
            ),
            transaction_id: entry.transaction_id,
            database_name: String::new(),
            namespace: String::new(),
            relation: String::new(),
            block,
            offset,
            tuple_id: tuple_id(block, offset),
            prev_tuple_id,
            fields: Vec::new(),
            population_error: String::new(),
            populate_time: DateTime::UNIX_EPOCH,
            parse_time,
            populate_wait: 0,
            populate_lag: 0,
            populate_duration: 0,
        }
    }

    /// True for any insert or update with no fields.
    pub fn missing_fields(&self) -> bool {
        self.message_type != MessageType::Delete && self.fields.is_empty()
    }

    /// The full table address of the form `db.ns.table`.
    pub fn rel_full_name(&self) -> String {
        format!("{}.{}.{}", self.database_name, self.namespace, self.relation)
    }

    /// Adds a populated field to the message.
    pub fn append_field(&mut self, name: String, kind: String, value: String) {
        self.fields.push(Field { name, kind, value });
    }

    /// Whether this message comes before another in LSN order.
    pub fn less_than(&self, other: &Message) -> bool {
        if self.timeline_id != other.timeline_id {
            return self.timeline_id < other.timeline_id;
        }
        if self.log_id != other.log_id {
            return self.log_id < other.log_id;
        }
        self.record_offset < other.record_offset
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:08X}/{:08X}/{:08X} xid:{} {}.{}.{} ({}:{})",
            self.message_type,
            self.timeline_id,
            self.log_id,
            self.record_offset,
            self.transaction_id,
            self.database_name,
            self.namespace,
            self.relation,
            self.block,
            self.offset
        )
    }
}

/// A collection of messages all committed on the same postgres commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "xid")]
    pub transaction_id: u32,
    #[serde(rename = "first")]
    pub first_key: Key,
    #[serde(rename = "commit")]
    pub commit_key: Key,
    pub commit_time: DateTime<Utc>,
    pub transaction_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<Table>,
    #[serde(default, skip_serializing_if = "is_zero_usize")]
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_version: String,
}

impl Transaction {
    /// Collapses the messages into the distinct tables they touch.
    ///
    /// Useful in contexts where the full transaction would be too large.
    pub fn switch_to_table_based_message(&mut self) {
        if !self.tables.is_empty() {
            return;
        }

        let mut tables: Vec<Table> = Vec::new();
        for message in &self.messages {
            let table = Table {
                database_name: message.database_name.clone(),
                namespace: message.namespace.clone(),
                relation: message.relation.clone(),
            };
            if !tables.contains(&table) {
                tables.push(table);
            }
        }

        self.message_count = self.messages.len();
        self.tables = tables;
        self.messages = Vec::new();
    }
}
