//! The populator stage.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::filter::MessageFilter;
use crate::message::{Key, Message, Table, Transaction};
use crate::pg::schema::SchemaReader;
use crate::pg::wal::{Entry, RecordType};

/// How often the replay-location catch-up wait polls the database.
const REPLAY_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn is_change(record_type: RecordType) -> bool {
    matches!(
        record_type,
        RecordType::Insert | RecordType::Update | RecordType::Delete | RecordType::MultiInsert
    )
}

/// Turns committed transactions into populated [`Transaction`] messages.
///
/// For each insert/update/delete entry the populator waits until the
/// database has replayed past the entry's LSN, then reads the current row
/// at its tuple address and attaches the surviving columns. Oversize
/// transactions (more entries than `max_message_count`, when set) skip
/// per-row population and carry only the set of touched tables.
///
/// Population failures never abort the pipeline; they are recorded on the
/// message that hit them.
pub struct Populator {
    filter: Arc<dyn MessageFilter>,
    schema: Arc<dyn SchemaReader>,
    max_message_count: usize,
    server_version: String,
}

impl Populator {
    /// Creates the stage.
    ///
    /// `max_message_count` of zero disables summary mode.
    pub fn new(
        filter: Arc<dyn MessageFilter>,
        schema: Arc<dyn SchemaReader>,
        max_message_count: usize,
        server_version: impl Into<String>,
    ) -> Populator {
        Populator {
            filter,
            schema,
            max_message_count,
            server_version: server_version.into(),
        }
    }

    /// Spawns the stage task.
    pub fn start(self, mut txns_in: mpsc::Receiver<Vec<Entry>>) -> mpsc::Receiver<Transaction> {
        let (txns_out, out) = mpsc::channel(1);

        tokio::spawn(async move {
            while let Some(entries) = txns_in.recv().await {
                if entries.is_empty() {
                    continue;
                }

                let txn = self.build_transaction(&entries).await;
                if txns_out.send(txn).await.is_err() {
                    return;
                }
            }
        });

        out
    }

    async fn build_transaction(&self, entries: &[Entry]) -> Transaction {
        let commit = &entries[entries.len() - 1];
        let first = &entries[0];

        let mut txn = Transaction {
            transaction_id: commit.transaction_id,
            first_key: Key::for_entry(first),
            commit_key: Key::for_entry(commit),
            commit_time: DateTime::from_timestamp_nanos(commit.parse_time),
            transaction_time: DateTime::UNIX_EPOCH,
            messages: Vec::new(),
            tables: Vec::new(),
            message_count: 0,
            server_version: self.server_version.clone(),
        };

        if self.max_message_count == 0 || entries.len() <= self.max_message_count {
            self.populate_transaction(&mut txn, entries).await;
        } else {
            self.populate_big_transaction(&mut txn, entries).await;
        }

        txn.transaction_time = Utc::now();
        txn
    }

    /// Detail mode: one populated message per change entry.
    async fn populate_transaction(&self, txn: &mut Transaction, entries: &[Entry]) {
        for entry in entries {
            if !is_change(entry.record_type) {
                continue;
            }

            let mut msg = Message::from_entry(entry);

            msg.populate_time = Utc::now();
            self.populate(&mut msg).await;
            msg.populate_duration = (Utc::now() - msg.populate_time)
                .num_nanoseconds()
                .unwrap_or(i64::MAX);

            txn.messages.push(msg);
        }
    }

    /// Summary mode: only the set of touched tables and a message count.
    async fn populate_big_transaction(&self, txn: &mut Transaction, entries: &[Entry]) {
        let mut seen: HashSet<(u32, u32, u32)> = HashSet::new();

        for entry in entries {
            if !is_change(entry.record_type) {
                continue;
            }
            txn.message_count += 1;

            let key = (entry.database_id, entry.tablespace_id, entry.relation_id);
            if !seen.insert(key) {
                continue;
            }

            let (namespace, relation) = self
                .schema
                .get_namespace_and_table(entry.database_id, entry.relation_id)
                .await;
            txn.tables.push(Table {
                database_name: self.schema.get_database_name(entry.database_id).await,
                namespace,
                relation,
            });
        }
    }

    /// Blocks until the database has replayed past the message's LSN.
    ///
    /// Returns the message's packed location, the replay location that
    /// released the wait, and how many polls that took.
    async fn wait_for_log_to_catch_up(&self, msg: &Message) -> (u64, u64, u32) {
        let current = (msg.log_id as u64) << 32 | msg.record_offset as u64;

        let mut latest = self.schema.latest_replay_location().await;
        let mut waits = 0;
        while current > latest {
            tokio::time::sleep(REPLAY_POLL_INTERVAL).await;
            latest = self.schema.latest_replay_location().await;
            waits += 1;
        }

        (current, latest, waits)
    }

    async fn populate(&self, msg: &mut Message) {
        let (current, latest, waits) = self.wait_for_log_to_catch_up(msg).await;
        msg.populate_wait = waits;
        msg.populate_lag = latest - current;

        msg.database_name = self.schema.get_database_name(msg.database_id).await;
        let (namespace, relation) = self
            .schema
            .get_namespace_and_table(msg.database_id, msg.relation_id)
            .await;
        msg.namespace = namespace;
        msg.relation = relation;

        // Deleted rows are gone; only inserts and updates have a current
        // row to read.
        if msg.message_type != crate::message::MessageType::Insert
            && msg.message_type != crate::message::MessageType::Update
        {
            return;
        }

        let values = self
            .schema
            .get_field_values(msg.database_id, msg.relation_id, msg.block, msg.offset)
            .await;

        match values {
            Err(err) => {
                msg.population_error =
                    format!("{} - ({}, {}, {})", err, current, latest, waits);
            }
            Ok(None) => {
                msg.population_error = "Message skipped for no fields.".to_string();
            }
            Ok(Some(fields)) => {
                let rel_full_name = msg.rel_full_name();
                for (field, value) in fields {
                    if !self.filter.filter_column(&rel_full_name, &field.column) {
                        let kind = field.kind();
                        msg.append_field(field.column, kind, value);
                    }
                }
            }
        }
    }
}
