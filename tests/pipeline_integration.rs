//! End-to-end tests: synthetic data directory in, transactions out.


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;
use tokio::time::timeout;

use herald::config::Config;
use herald::message::{MessageType, Transaction};
use herald::pg::schema::{SchemaError, SchemaField, SchemaReader, NOT_IN_RECOVERY};
use herald::pg::version;
use herald::stream::start_transaction_channel;
use wal_test_support::*;

/// A schema reader over a fixed two-table catalog.
struct FixedCatalog;

#[async_trait]
impl SchemaReader for FixedCatalog {
    async fn latest_replay_location(&self) -> u64 {
        NOT_IN_RECOVERY
    }

    async fn get_database_name(&self, database_id: u32) -> String {
        if database_id == 16384 {
            "app".to_string()
        } else {
            String::new()
        }
    }

    async fn get_namespace_and_table(
        &self,
        database_id: u32,
        relation_id: u32,
    ) -> (String, String) {
        match (database_id, relation_id) {
            (16384, 16400) => ("public".to_string(), "users".to_string()),
            (16384, 16500) => ("public".to_string(), "orders".to_string()),
            _ => (String::new(), String::new()),
        }
    }

    async fn get_field_values(
        &self,
        database_id: u32,
        relation_id: u32,
        _block: u32,
        _offset: u16,
    ) -> Result<Option<Vec<(SchemaField, String)>>, SchemaError> {
        if database_id != 16384 || relation_id != 16400 {
            return Ok(None);
        }
        Ok(Some(vec![(
            SchemaField {
                column: "id".into(),
                data_type: "integer".into(),
                size: 0,
            },
            "1".into(),
        )]))
    }

    async fn convert_rel_names_to_ids(&self, names: &[String]) -> HashMap<u32, String> {
        [(16400, "app.public.users"), (16500, "app.public.orders")]
            .iter()
            .filter(|(_, name)| names.iter().any(|n| n == name))
            .map(|(id, name)| (*id, name.to_string()))
            .collect()
    }

    async fn have_connection_to_db(&self, database_id: u32) -> bool {
        database_id == 16384
    }
}

async fn write_version(dir: &std::path::Path) {
    tokio::fs::write(dir.join("PG_VERSION"), "9.4\n")
        .await
        .unwrap();
}

fn config_for(dir: &std::path::Path, buffer_dir: &std::path::Path) -> Config {
    Config {
        data_dir: dir.to_path_buf(),
        pg_conn_strings: vec!["host=localhost dbname=app".to_string()],
        buffer_directory: Some(buffer_dir.to_path_buf()),
        ..Config::default()
    }
}

async fn collect_transactions(
    config: &Config,
    count: usize,
) -> (herald::stream::Pipeline, Vec<Transaction>) {
    let (pipeline, mut txns) =
        start_transaction_channel("9.4.1", config, Arc::new(FixedCatalog))
            .await
            .unwrap();

    let mut out = Vec::new();
    for _ in 0..count {
        let txn = timeout(Duration::from_secs(10), txns.recv())
            .await
            .expect("timed out waiting for a transaction")
            .expect("transaction channel closed early");
        out.push(txn);
    }

    (pipeline, out)
}

#[tokio::test]
async fn test_commits_come_out_as_populated_transactions() {
    let dir = tempdir().unwrap();
    let buffers = tempdir().unwrap();
    write_version(dir.path()).await;

    let mut writer = WalWriter::new(dir.path(), MAGIC_V94, 0);
    writer.append_record(100, 0x00, RM_HEAP, &insert_body(16400, 1, 1));
    writer.append_record(100, 0x00, RM_XACT, &[0u8; 24]);
    writer.append_record(101, 0x00, RM_HEAP, &insert_body(16500, 2, 1));
    writer.append_record(101, 0x00, RM_XACT, &[0u8; 24]);
    writer.finish().await;

    let config = config_for(dir.path(), buffers.path());
    let (pipeline, txns) = collect_transactions(&config, 2).await;

    let txn = &txns[0];
    assert_eq!(txn.transaction_id, 100);
    assert_eq!(txn.server_version, "9.4.1");
    assert_eq!(txn.messages.len(), 1);

    let msg = &txn.messages[0];
    assert_eq!(msg.message_type, MessageType::Insert);
    assert_eq!(msg.transaction_id, 100);
    assert_eq!(msg.database_name, "app");
    assert_eq!(msg.relation, "users");
    assert_eq!(msg.tuple_id, "(1,1)");
    assert_eq!(msg.fields.len(), 1);
    assert_eq!(msg.fields[0].name, "id");

    // Key format: 24 uppercase hex characters, message before commit.
    assert_eq!(msg.key.to_string().len(), 24);
    assert!(msg.key <= txn.commit_key);
    assert!(txn.first_key.is_before(&txn.commit_key));

    // The unknown-relation insert is populated with an error, not dropped.
    let other = &txns[1].messages[0];
    assert_eq!(txns[1].transaction_id, 101);
    assert_eq!(other.population_error, "Message skipped for no fields.");

    pipeline.stop();
}

#[tokio::test]
async fn test_interleaved_transactions_emit_in_commit_order() {
    let dir = tempdir().unwrap();
    let buffers = tempdir().unwrap();
    write_version(dir.path()).await;

    let mut writer = WalWriter::new(dir.path(), MAGIC_V94, 0);
    writer.append_record(200, 0x00, RM_HEAP, &insert_body(16400, 1, 1));
    writer.append_record(201, 0x00, RM_HEAP, &insert_body(16400, 1, 2));
    writer.append_record(201, 0x00, RM_XACT, &[0u8; 24]); // 201 commits first
    writer.append_record(200, 0x00, RM_HEAP, &insert_body(16400, 1, 3));
    writer.append_record(200, 0x00, RM_XACT, &[0u8; 24]);
    writer.finish().await;

    let config = config_for(dir.path(), buffers.path());
    let (pipeline, txns) = collect_transactions(&config, 2).await;

    assert_eq!(txns[0].transaction_id, 201);
    assert_eq!(txns[0].messages.len(), 1);
    assert_eq!(txns[1].transaction_id, 200);
    assert_eq!(txns[1].messages.len(), 2);

    // Commit locations never run backwards.
    assert!(txns[0].commit_key.is_before(&txns[1].commit_key));

    pipeline.stop();
}

#[tokio::test]
async fn test_aborted_transactions_are_not_emitted() {
    let dir = tempdir().unwrap();
    let buffers = tempdir().unwrap();
    write_version(dir.path()).await;

    let mut writer = WalWriter::new(dir.path(), MAGIC_V94, 0);
    writer.append_record(300, 0x00, RM_HEAP, &insert_body(16400, 1, 1));
    writer.append_record(300, 0x20, RM_XACT, &[0u8; 24]); // abort
    writer.append_record(301, 0x00, RM_HEAP, &insert_body(16400, 1, 2));
    writer.append_record(301, 0x00, RM_XACT, &[0u8; 24]);
    writer.finish().await;

    let config = config_for(dir.path(), buffers.path());
    let (pipeline, txns) = collect_transactions(&config, 1).await;

    // Only the committed transaction appears.
    assert_eq!(txns[0].transaction_id, 301);

    pipeline.stop();
}

#[tokio::test]
async fn test_multi_insert_tuples_arrive_in_one_transaction() {
    let dir = tempdir().unwrap();
    let buffers = tempdir().unwrap();
    write_version(dir.path()).await;

    let mut writer = WalWriter::new(dir.path(), MAGIC_V94, 0);
    writer.append_record(400, 0x50, RM_HEAP, &multi_insert_body(16400, 9, &[1, 2, 3]));
    writer.append_record(400, 0x00, RM_XACT, &[0u8; 24]);
    writer.finish().await;

    let config = config_for(dir.path(), buffers.path());
    let (pipeline, txns) = collect_transactions(&config, 1).await;

    let txn = &txns[0];
    assert_eq!(txn.messages.len(), 3);
    assert!(txn
        .messages
        .iter()
        .all(|m| m.message_type == MessageType::Insert));
    let ctids: Vec<&str> = txn.messages.iter().map(|m| m.tuple_id.as_str()).collect();
    assert_eq!(ctids, vec!["(9,1)", "(9,2)", "(9,3)"]);

    pipeline.stop();
}

#[tokio::test]
async fn test_summary_mode_for_oversize_transactions() {
    let dir = tempdir().unwrap();
    let buffers = tempdir().unwrap();
    write_version(dir.path()).await;

    let mut writer = WalWriter::new(dir.path(), MAGIC_V94, 0);
    for i in 0..10u16 {
        let relation = if i % 2 == 0 { 16400 } else { 16500 };
        writer.append_record(500, 0x00, RM_HEAP, &insert_body(relation, 1, i + 1));
    }
    writer.append_record(500, 0x00, RM_XACT, &[0u8; 24]);
    writer.finish().await;

    let mut config = config_for(dir.path(), buffers.path());
    config.max_message_per_txn = 5;

    let (pipeline, txns) = collect_transactions(&config, 1).await;

    let txn = &txns[0];
    assert_eq!(txn.message_count, 10);
    assert_eq!(txn.tables.len(), 2);
    assert!(txn.messages.is_empty());

    pipeline.stop();
}

#[tokio::test]
async fn test_exclude_filter_drops_relations_end_to_end() {
    let dir = tempdir().unwrap();
    let buffers = tempdir().unwrap();
    write_version(dir.path()).await;

    let mut writer = WalWriter::new(dir.path(), MAGIC_V94, 0);
    writer.append_record(600, 0x00, RM_HEAP, &insert_body(16500, 1, 1)); // orders, excluded
    writer.append_record(600, 0x00, RM_HEAP, &insert_body(16400, 1, 2)); // users, kept
    writer.append_record(600, 0x00, RM_XACT, &[0u8; 24]);
    writer.finish().await;

    let mut config = config_for(dir.path(), buffers.path());
    config
        .exclude
        .insert("app.public.orders".to_string(), vec!["*".to_string()]);

    let (pipeline, txns) = collect_transactions(&config, 1).await;

    let txn = &txns[0];
    assert_eq!(txn.messages.len(), 1);
    assert_eq!(txn.messages[0].relation, "users");

    pipeline.stop();
}

#[tokio::test]
async fn test_stop_closes_the_transaction_channel() {
    let dir = tempdir().unwrap();
    let buffers = tempdir().unwrap();
    write_version(dir.path()).await;

    let mut writer = WalWriter::new(dir.path(), MAGIC_V94, 0);
    writer.append_record(700, 0x00, RM_HEAP, &insert_body(16400, 1, 1));
    writer.append_record(700, 0x00, RM_XACT, &[0u8; 24]);
    writer.finish().await;

    let config = config_for(dir.path(), buffers.path());
    let (pipeline, mut txns) =
        start_transaction_channel("9.4.1", &config, Arc::new(FixedCatalog))
            .await
            .unwrap();

    timeout(Duration::from_secs(10), txns.recv())
        .await
        .expect("timed out waiting for a transaction")
        .expect("transaction channel closed early");

    pipeline.stop();

    let closed = timeout(Duration::from_secs(10), async {
        while txns.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "channel should close after stop");
}

#[tokio::test]
async fn test_version_gate_reads_pg_version() {
    let dir = tempdir().unwrap();
    write_version(dir.path()).await;
    assert_eq!(version::ensure_supported(dir.path()).await.unwrap(), "9.4");
}
