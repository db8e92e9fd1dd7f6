//! Transaction ids and the BEGIN/COMMIT/ABORT records around them

use crate::logging::{BackendLogger, LogManager};
use crate::wal::{LogRecord, LogRecordType};
use crate::{LoggingType, Oid, Result, TransactionId, Tuple, TupleLocation};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A running transaction.
///
/// Carries the backend logger of the thread that began it, if that thread
/// could log at the time.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    logger: Option<Arc<BackendLogger>>,
}

impl Transaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Backend logger, None if logging was not active when the transaction began
    pub fn logger(&self) -> Option<&Arc<BackendLogger>> {
        self.logger.as_ref()
    }

    /// Log an insert of `tuple` at `location`
    pub fn log_insert(
        &self,
        database_id: Oid,
        table_id: Oid,
        location: TupleLocation,
        tuple: &Tuple,
    ) -> Result<()> {
        self.log_tuple(
            LogRecordType::TupleInsert,
            database_id,
            table_id,
            location,
            TupleLocation::INVALID,
            Some(tuple),
        )
    }

    /// Log a move of a tuple from `old` to `new`
    pub fn log_update(
        &self,
        database_id: Oid,
        table_id: Oid,
        old: TupleLocation,
        new: TupleLocation,
        tuple: &Tuple,
    ) -> Result<()> {
        self.log_tuple(LogRecordType::TupleUpdate, database_id, table_id, new, old, Some(tuple))
    }

    /// Log the removal of the tuple at `location`
    pub fn log_delete(&self, database_id: Oid, table_id: Oid, location: TupleLocation) -> Result<()> {
        self.log_tuple(
            LogRecordType::TupleDelete,
            database_id,
            table_id,
            TupleLocation::INVALID,
            location,
            None,
        )
    }

    fn log_tuple(
        &self,
        kind: LogRecordType,
        database_id: Oid,
        table_id: Oid,
        new_location: TupleLocation,
        old_location: TupleLocation,
        tuple: Option<&Tuple>,
    ) -> Result<()> {
        if let Some(logger) = &self.logger {
            let record = logger.get_tuple_record(
                kind,
                self.id,
                table_id,
                new_location,
                old_location,
                tuple,
                database_id,
            )?;
            logger.log(record);
        }
        Ok(())
    }
}

/// Allocates transaction ids and brackets transactions with log records
pub struct TransactionManager {
    logs: Arc<LogManager>,
    logging_type: LoggingType,
    next_id: AtomicU64,
}

impl TransactionManager {
    pub fn new(logs: Arc<LogManager>, logging_type: LoggingType) -> Self {
        Self {
            logs,
            logging_type,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn logging_type(&self) -> LoggingType {
        self.logging_type
    }

    /// Start a transaction on the calling thread and log its BEGIN
    pub fn begin_transaction(&self) -> Transaction {
        let id = TransactionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let logger = match self.logs.get_backend_logger(self.logging_type) {
            Ok(logger) => {
                logger.log(LogRecord::begin(id));
                Some(logger)
            }
            Err(e) => {
                debug!("{} runs without logging: {}", id, e);
                None
            }
        };
        Transaction { id, logger }
    }

    /// Log COMMIT; under force-at-commit, return only once it is durable
    pub fn commit_transaction(&self, txn: Transaction) -> Result<()> {
        if let Some(logger) = &txn.logger {
            logger.log(LogRecord::commit(txn.id));
            if self.logs.commit_waits_for_durability(self.logging_type) {
                logger.wait_for_flushing()?;
            }
        }
        Ok(())
    }

    /// Log ABORT. The caller undoes the in-memory effects.
    pub fn abort_transaction(&self, txn: Transaction) {
        if let Some(logger) = &txn.logger {
            logger.log(LogRecord::abort(txn.id));
        }
    }

    /// Never hand out `id` or anything below it again
    pub fn advance_past(&self, id: TransactionId) {
        self.next_id
            .fetch_max(id.as_u64().saturating_add(1), Ordering::SeqCst);
    }

    /// Id the next transaction will get
    pub fn next_transaction_id(&self) -> TransactionId {
        TransactionId(self.next_id.load(Ordering::SeqCst))
    }

    /// Restart id allocation, as after a restart
    pub fn reset_states(&self) {
        self.next_id.store(1, Ordering::SeqCst);
    }
}
