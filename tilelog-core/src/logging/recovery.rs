//! Redo replay of the sink into the tuple store

use crate::storage::TupleStore;
use crate::wal::{LogRecord, LogScan};
use crate::{Oid, Result, Schema, TileLogError, TransactionId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Summary of one recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub records_read: usize,
    pub committed_transactions: usize,
    /// Transactions seen in the log whose effects were not applied
    pub skipped_transactions: usize,
    pub aborted_transactions: usize,
    pub tuples_inserted: usize,
    pub tuples_updated: usize,
    pub tuples_deleted: usize,
    /// Highest transaction id found in the log
    pub max_txn_id: Option<TransactionId>,
    /// Bytes discarded as a torn tail
    pub torn_bytes: u64,
}

impl RecoveryStats {
    /// Tuple records applied
    pub fn tuples_applied(&self) -> usize {
        self.tuples_inserted + self.tuples_updated + self.tuples_deleted
    }
}

/// Applies the tuple records of committed transactions, in log order.
///
/// Both insert-at and delete-at are idempotent against the store, so a
/// replay interrupted by a crash can simply run again.
pub struct Replayer<'a> {
    store: &'a dyn TupleStore,
    redo_all: bool,
    schemas: HashMap<(Oid, Oid), Schema>,
}

impl<'a> Replayer<'a> {
    /// Replay into `store`; with `redo_all` every transaction counts as committed
    pub fn new(store: &'a dyn TupleStore, redo_all: bool) -> Self {
        Self {
            store,
            redo_all,
            schemas: HashMap::new(),
        }
    }

    /// Run both passes over a scanned sink
    pub fn replay(mut self, scan: &LogScan) -> Result<RecoveryStats> {
        let mut stats = RecoveryStats {
            records_read: scan.records.len(),
            torn_bytes: scan.torn_bytes,
            ..Default::default()
        };

        // Pass 1: decide which transactions count
        let mut seen = HashSet::new();
        let mut committed = HashSet::new();
        let mut aborted = HashSet::new();
        for (_, record) in &scan.records {
            let txn_id = record.txn_id();
            seen.insert(txn_id);
            match record {
                LogRecord::Commit { .. } => {
                    committed.insert(txn_id);
                }
                LogRecord::Abort { .. } => {
                    aborted.insert(txn_id);
                }
                _ => {}
            }
        }
        stats.max_txn_id = seen.iter().max().copied();

        let committed: HashSet<TransactionId> = if self.redo_all {
            seen.clone()
        } else {
            committed.difference(&aborted).copied().collect()
        };
        stats.committed_transactions = committed.len();
        stats.aborted_transactions = aborted.len();
        stats.skipped_transactions = seen.len() - committed.len();

        // Pass 2: redo
        for (offset, record) in &scan.records {
            if !record.record_type().is_tuple() || !committed.contains(&record.txn_id()) {
                continue;
            }
            self.apply(*offset, record, &mut stats)?;
        }

        info!(
            "Replayed {} records: {} committed, {} skipped, {} inserted, {} updated, {} deleted",
            stats.records_read,
            stats.committed_transactions,
            stats.skipped_transactions,
            stats.tuples_inserted,
            stats.tuples_updated,
            stats.tuples_deleted
        );
        Ok(stats)
    }

    fn apply(&mut self, offset: u64, record: &LogRecord, stats: &mut RecoveryStats) -> Result<()> {
        let Some(header) = record.tuple_header() else {
            return Ok(());
        };
        let (database_id, table_id) = (header.database_id, header.table_id);

        match record {
            LogRecord::Insert { location, .. } => {
                let tuple = self.checked_tuple(offset, record, database_id, table_id)?;
                self.store.insert_tuple_at(database_id, table_id, *location, tuple)?;
                stats.tuples_inserted += 1;
            }
            LogRecord::Update {
                old_location,
                new_location,
                ..
            } => {
                let tuple = self.checked_tuple(offset, record, database_id, table_id)?;
                self.store
                    .update_tuple_at(database_id, table_id, *old_location, *new_location, tuple)?;
                stats.tuples_updated += 1;
            }
            LogRecord::Delete { location, .. } => {
                if !self.store.delete_tuple_at(database_id, table_id, *location)? {
                    debug!("Delete at {} found an empty slot", location);
                }
                stats.tuples_deleted += 1;
            }
            LogRecord::Begin { .. } | LogRecord::Commit { .. } | LogRecord::Abort { .. } => {}
        }
        Ok(())
    }

    /// Decode the payload and check it against the table's schema
    fn checked_tuple(
        &mut self,
        offset: u64,
        record: &LogRecord,
        database_id: Oid,
        table_id: Oid,
    ) -> Result<crate::Tuple> {
        let corruption = |reason: String| TileLogError::ReplayCorruption { offset, reason };

        let tuple = record
            .decode_tuple()
            .map_err(|e| corruption(e.to_string()))?
            .ok_or_else(|| corruption(format!("{:?} record has no payload", record.record_type())))?;

        let schema = match self.schemas.get(&(database_id, table_id)) {
            Some(schema) => schema,
            None => {
                let schema = self.store.schema_of(database_id, table_id)?;
                self.schemas.entry((database_id, table_id)).or_insert(schema)
            }
        };
        schema.validate(&tuple).map_err(|reason| {
            corruption(format!(
                "payload does not fit table {} in database {}: {}",
                table_id, database_id, reason
            ))
        })?;
        Ok(tuple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Catalog;
    use crate::wal::{LogReader, TupleHeader};
    use crate::{Column, Tuple, TupleLocation, Value, ValueType};
    use bytes::{Bytes, BytesMut};

    const DB: Oid = 1;
    const TABLE: Oid = 2;

    fn catalog() -> Catalog {
        let catalog = Catalog::new();
        catalog.create_database(DB).unwrap();
        let schema = Schema::new(vec![
            Column::new("id", ValueType::Integer, 8),
            Column::new("name", ValueType::Varchar, 16),
        ]);
        catalog.create_table(DB, TABLE, "t", schema, 4).unwrap();
        catalog
    }

    fn row(id: i64) -> Tuple {
        Tuple::new(vec![Value::Integer(id), Value::from(format!("row{}", id))])
    }

    fn header(txn: u64) -> TupleHeader {
        TupleHeader {
            txn_id: TransactionId(txn),
            database_id: DB,
            table_id: TABLE,
        }
    }

    fn insert(txn: u64, loc: TupleLocation, id: i64) -> LogRecord {
        LogRecord::Insert {
            header: header(txn),
            location: loc,
            payload: LogRecord::encode_tuple(&row(id)).unwrap(),
        }
    }

    fn scan(records: &[LogRecord]) -> LogScan {
        let mut buf = BytesMut::new();
        for record in records {
            record.encode_into(&mut buf);
        }
        LogReader::scan(&buf).unwrap()
    }

    fn txn(id: u64) -> TransactionId {
        TransactionId(id)
    }

    #[test]
    fn test_only_committed_applied() {
        let catalog = catalog();
        let log = scan(&[
            LogRecord::begin(txn(1)),
            insert(1, TupleLocation::new(0, 0), 1),
            LogRecord::commit(txn(1)),
            LogRecord::begin(txn(2)),
            insert(2, TupleLocation::new(0, 1), 2),
            LogRecord::abort(txn(2)),
            // No terminal record: lost in the crash
            LogRecord::begin(txn(3)),
            insert(3, TupleLocation::new(0, 2), 3),
        ]);

        let stats = Replayer::new(&catalog, false).replay(&log).unwrap();
        assert_eq!(stats.records_read, 8);
        assert_eq!(stats.committed_transactions, 1);
        assert_eq!(stats.aborted_transactions, 1);
        assert_eq!(stats.skipped_transactions, 2);
        assert_eq!(stats.tuples_inserted, 1);
        assert_eq!(stats.max_txn_id, Some(txn(3)));

        let table = catalog.get_table(DB, TABLE).unwrap();
        assert_eq!(table.active_tuple_count(), 1);
        assert_eq!(table.get_tuple(TupleLocation::new(0, 0)), Some(row(1)));
    }

    #[test]
    fn test_redo_all() {
        let catalog = catalog();
        let log = scan(&[
            LogRecord::begin(txn(1)),
            insert(1, TupleLocation::new(0, 0), 1),
            LogRecord::abort(txn(1)),
            LogRecord::begin(txn(2)),
            insert(2, TupleLocation::new(0, 1), 2),
        ]);

        let stats = Replayer::new(&catalog, true).replay(&log).unwrap();
        assert_eq!(stats.committed_transactions, 2);
        assert_eq!(stats.skipped_transactions, 0);
        assert_eq!(catalog.get_table(DB, TABLE).unwrap().active_tuple_count(), 2);
    }

    #[test]
    fn test_update_and_delete_in_log_order() {
        let catalog = catalog();
        let first = TupleLocation::new(0, 0);
        let second = TupleLocation::new(0, 1);
        let log = scan(&[
            LogRecord::begin(txn(1)),
            insert(1, first, 1),
            LogRecord::commit(txn(1)),
            LogRecord::begin(txn(2)),
            LogRecord::Update {
                header: header(2),
                old_location: first,
                new_location: second,
                payload: LogRecord::encode_tuple(&row(10)).unwrap(),
            },
            LogRecord::commit(txn(2)),
            LogRecord::begin(txn(3)),
            insert(3, TupleLocation::new(0, 2), 3),
            LogRecord::Delete {
                header: header(3),
                location: second,
            },
            LogRecord::commit(txn(3)),
        ]);

        let stats = Replayer::new(&catalog, false).replay(&log).unwrap();
        assert_eq!(stats.tuples_applied(), 4);

        let table = catalog.get_table(DB, TABLE).unwrap();
        assert_eq!(table.get_tuple(first), None);
        assert_eq!(table.get_tuple(second), None);
        assert_eq!(table.get_tuple(TupleLocation::new(0, 2)), Some(row(3)));
        assert_eq!(table.active_tuple_count(), 1);
    }

    #[test]
    fn test_replay_is_idempotent() {
        let catalog = catalog();
        let log = scan(&[
            LogRecord::begin(txn(1)),
            insert(1, TupleLocation::new(0, 0), 1),
            insert(1, TupleLocation::new(0, 1), 2),
            LogRecord::Delete {
                header: header(1),
                location: TupleLocation::new(0, 0),
            },
            LogRecord::commit(txn(1)),
        ]);

        let first = Replayer::new(&catalog, false).replay(&log).unwrap();
        let table = catalog.get_table(DB, TABLE).unwrap();
        let after_first = table.scan();

        let second = Replayer::new(&catalog, false).replay(&log).unwrap();
        assert_eq!(first, second);
        assert_eq!(table.scan(), after_first);
        assert_eq!(table.active_tuple_count(), 1);
    }

    #[test]
    fn test_payload_schema_mismatch_is_corruption() {
        let catalog = catalog();
        let bad = LogRecord::Insert {
            header: header(1),
            location: TupleLocation::new(0, 0),
            payload: LogRecord::encode_tuple(&Tuple::new(vec![Value::Boolean(true)])).unwrap(),
        };
        let log = scan(&[LogRecord::begin(txn(1)), bad, LogRecord::commit(txn(1))]);
        let offset = log.records[1].0;

        let err = Replayer::new(&catalog, false).replay(&log).unwrap_err();
        assert!(matches!(err, TileLogError::ReplayCorruption { offset: o, .. } if o == offset));

        let garbage = LogRecord::Insert {
            header: header(2),
            location: TupleLocation::new(0, 0),
            payload: Bytes::from_static(&[0xff; 3]),
        };
        let log = scan(&[garbage, LogRecord::commit(txn(2))]);
        assert!(Replayer::new(&catalog, false).replay(&log).unwrap_err().is_corruption());
    }

    #[test]
    fn test_unknown_table_is_fatal() {
        let catalog = catalog();
        let record = LogRecord::Insert {
            header: TupleHeader {
                txn_id: txn(1),
                database_id: DB,
                table_id: 99,
            },
            location: TupleLocation::new(0, 0),
            payload: LogRecord::encode_tuple(&row(1)).unwrap(),
        };
        let log = scan(&[record, LogRecord::commit(txn(1))]);

        let err = Replayer::new(&catalog, false).replay(&log).unwrap_err();
        assert!(matches!(err, TileLogError::TableNotFound { table_id: 99, .. }));
    }
}
