//! The transaction buffer stage.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use super::spill::SpillBuffer;
use crate::filter::MessageFilter;
use crate::pg::wal::{Entry, RecordType, ENTRY_BYTES_SIZE};

/// Default process-wide memory ceiling for buffered entries.
pub const DEFAULT_BUFFER_MAX: u64 = 10 * 1024 * ENTRY_BYTES_SIZE as u64;

/// Groups WAL entries by transaction until their commit or abort arrives.
///
/// The stage consumes the driver's entry stream and emits one `Vec<Entry>`
/// per *committed* transaction: its insert/update/delete entries in WAL
/// order, the commit entry last. Aborted transactions are discarded.
pub struct TxnBuffer {
    filter: Arc<dyn MessageFilter>,
    working_dir: PathBuf,
    memory_limit: u64,
}

impl TxnBuffer {
    /// Creates the stage with a spill directory and memory ceiling.
    pub fn new(
        filter: Arc<dyn MessageFilter>,
        working_dir: impl Into<PathBuf>,
        memory_limit: u64,
    ) -> TxnBuffer {
        TxnBuffer {
            filter,
            working_dir: working_dir.into(),
            memory_limit,
        }
    }

    /// Spawns the stage task.
    ///
    /// The returned channel closes once the input closes and all pending
    /// output has been handed over.
    pub fn start(self, mut entries: mpsc::Receiver<Entry>) -> mpsc::Receiver<Vec<Entry>> {
        let (txns, out) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut buffer = SpillBuffer::new(
                self.working_dir.clone(),
                self.memory_limit,
                ENTRY_BYTES_SIZE as u64,
            )
            .await;

            let mut last_accepted: Option<u64> = None;

            while let Some(entry) = entries.recv().await {
                // A checkpoint-restart re-read walks the same records again;
                // anything strictly behind the last accepted offset is a
                // duplicate.
                if let Some(last) = last_accepted {
                    if last > entry.read_from.offset() {
                        continue;
                    }
                }
                if entry.record_type == RecordType::Unknown {
                    continue;
                }

                match entry.record_type {
                    RecordType::Commit => {
                        last_accepted = Some(entry.read_from.offset());

                        let mut txn = Vec::new();
                        for bytes in buffer.remove(entry.transaction_id).await {
                            match Entry::from_bytes(&bytes) {
                                Some(buffered) => txn.push(buffered),
                                None => warn!(
                                    xid = entry.transaction_id,
                                    "dropping undersized buffered entry"
                                ),
                            }
                        }
                        txn.push(entry);

                        if txns.send(txn).await.is_err() {
                            return;
                        }
                    }
                    RecordType::Abort => {
                        last_accepted = Some(entry.read_from.offset());
                        buffer.remove(entry.transaction_id).await;
                    }
                    _ => {
                        if self.filter.filter_rel_id(entry.relation_id).await {
                            continue;
                        }
                        last_accepted = Some(entry.read_from.offset());
                        buffer.add(entry.transaction_id, &entry.to_bytes()).await;
                    }
                }
            }
        });

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterNone;
    use crate::pg::wal::Location;
    use tempfile::tempdir;

    fn entry(record_type: RecordType, xid: u32, offset: u64) -> Entry {
        Entry {
            record_type,
            read_from: Location::with_defaults(offset),
            previous: Location::with_defaults(offset.saturating_sub(64)),
            timeline_id: 1,
            log_id: 0,
            transaction_id: xid,
            tablespace_id: 1663,
            database_id: 16384,
            relation_id: 16400,
            from_block: 0,
            from_offset: 0,
            to_block: 1,
            to_offset: 1,
            parse_time: 0,
        }
    }

    async fn run_through(entries_in: Vec<Entry>) -> Vec<Vec<Entry>> {
        let dir = tempdir().unwrap();
        let stage = TxnBuffer::new(Arc::new(FilterNone), dir.path(), DEFAULT_BUFFER_MAX);

        let (tx, rx) = mpsc::channel(1);
        let mut out = stage.start(rx);

        let feeder = tokio::spawn(async move {
            for entry in entries_in {
                tx.send(entry).await.unwrap();
            }
        });

        let mut txns = Vec::new();
        while let Some(txn) = out.recv().await {
            txns.push(txn);
        }
        feeder.await.unwrap();
        txns
    }

    #[tokio::test]
    async fn test_commit_groups_entries_by_transaction() {
        let txns = run_through(vec![
            entry(RecordType::Update, 10, 100),
            entry(RecordType::Update, 1, 200),
            entry(RecordType::Commit, 10, 300),
        ])
        .await;

        assert_eq!(txns.len(), 1);
        let txn = &txns[0];
        assert_eq!(txn.len(), 2);
        assert_eq!(txn[0].record_type, RecordType::Update);
        assert_eq!(txn[1].record_type, RecordType::Commit);
        assert!(txn.iter().all(|e| e.transaction_id == 10));
    }

    #[tokio::test]
    async fn test_entries_stay_in_wal_order() {
        let txns = run_through(vec![
            entry(RecordType::Insert, 5, 100),
            entry(RecordType::Update, 5, 200),
            entry(RecordType::Delete, 5, 300),
            entry(RecordType::Commit, 5, 400),
        ])
        .await;

        assert_eq!(txns.len(), 1);
        let kinds: Vec<RecordType> = txns[0].iter().map(|e| e.record_type).collect();
        assert_eq!(
            kinds,
            vec![
                RecordType::Insert,
                RecordType::Update,
                RecordType::Delete,
                RecordType::Commit
            ]
        );
        let offsets: Vec<u64> = txns[0].iter().map(|e| e.read_from.offset()).collect();
        assert_eq!(offsets, vec![100, 200, 300, 400]);
    }

    #[tokio::test]
    async fn test_decreasing_offset_is_dropped() {
        let txns = run_through(vec![
            entry(RecordType::Insert, 5, 200),
            entry(RecordType::Insert, 5, 100), // re-read, behind the first
            entry(RecordType::Commit, 5, 300),
        ])
        .await;

        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].len(), 2);
        assert_eq!(txns[0][0].read_from.offset(), 200);
    }

    #[tokio::test]
    async fn test_equal_offsets_survive() {
        // Expanded multi-insert tuples share one read-from offset.
        let txns = run_through(vec![
            entry(RecordType::MultiInsert, 5, 100),
            entry(RecordType::MultiInsert, 5, 100),
            entry(RecordType::MultiInsert, 5, 100),
            entry(RecordType::Commit, 5, 300),
        ])
        .await;

        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_entries_are_dropped() {
        let txns = run_through(vec![
            entry(RecordType::Unknown, 5, 100),
            entry(RecordType::Insert, 5, 200),
            entry(RecordType::Commit, 5, 300),
        ])
        .await;

        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].len(), 2);
    }

    #[tokio::test]
    async fn test_abort_discards_transaction() {
        let txns = run_through(vec![
            entry(RecordType::Insert, 5, 100),
            entry(RecordType::Abort, 5, 200),
            entry(RecordType::Insert, 6, 300),
            entry(RecordType::Commit, 6, 400),
        ])
        .await;

        assert_eq!(txns.len(), 1);
        assert!(txns[0].iter().all(|e| e.transaction_id == 6));
    }

    #[tokio::test]
    async fn test_stray_abort_is_a_noop() {
        let txns = run_through(vec![
            entry(RecordType::Abort, 99, 100),
            entry(RecordType::Insert, 5, 200),
            entry(RecordType::Commit, 5, 300),
        ])
        .await;

        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].len(), 2);
    }

    #[tokio::test]
    async fn test_interleaved_transactions_emit_in_commit_order() {
        let txns = run_through(vec![
            entry(RecordType::Insert, 1, 100),
            entry(RecordType::Insert, 2, 200),
            entry(RecordType::Insert, 1, 300),
            entry(RecordType::Commit, 2, 400),
            entry(RecordType::Commit, 1, 500),
        ])
        .await;

        assert_eq!(txns.len(), 2);
        assert_eq!(txns[0].last().unwrap().transaction_id, 2);
        assert_eq!(txns[1].last().unwrap().transaction_id, 1);
        assert_eq!(txns[1].len(), 3);
    }

    /// A filter that drops one specific relation.
    struct DropRelation(u32);

    #[async_trait::async_trait]
    impl MessageFilter for DropRelation {
        async fn filter_rel_id(&self, relation_id: u32) -> bool {
            relation_id == self.0
        }

        fn filter_column(&self, _rel: &str, _column: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_filtered_relations_are_dropped() {
        let dir = tempdir().unwrap();
        let stage = TxnBuffer::new(Arc::new(DropRelation(16400)), dir.path(), DEFAULT_BUFFER_MAX);

        let (tx, rx) = mpsc::channel(1);
        let mut out = stage.start(rx);

        tokio::spawn(async move {
            let mut dropped = entry(RecordType::Insert, 5, 100);
            dropped.relation_id = 16400;
            let mut kept = entry(RecordType::Insert, 5, 200);
            kept.relation_id = 20000;
            tx.send(dropped).await.unwrap();
            tx.send(kept).await.unwrap();
            tx.send(entry(RecordType::Commit, 5, 300)).await.unwrap();
        });

        let txn = out.recv().await.unwrap();
        assert_eq!(txn.len(), 2);
        assert_eq!(txn[0].relation_id, 20000);
    }

    #[tokio::test]
    async fn test_round_trips_through_the_spill_store() {
        let dir = tempdir().unwrap();
        // Limit zero: every entry takes the disk path.
        let stage = TxnBuffer::new(Arc::new(FilterNone), dir.path(), 0);

        let (tx, rx) = mpsc::channel(1);
        let mut out = stage.start(rx);

        tokio::spawn(async move {
            tx.send(entry(RecordType::Insert, 5, 100)).await.unwrap();
            tx.send(entry(RecordType::Update, 5, 200)).await.unwrap();
            tx.send(entry(RecordType::Commit, 5, 300)).await.unwrap();
        });

        let txn = out.recv().await.unwrap();
        assert_eq!(txn.len(), 3);
        assert_eq!(txn[0].record_type, RecordType::Insert);
        assert_eq!(txn[0].read_from.offset(), 100);
        assert_eq!(txn[1].record_type, RecordType::Update);
        assert_eq!(txn[2].record_type, RecordType::Commit);
    }
}
