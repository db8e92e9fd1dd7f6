//! Backend logger: one thread's record buffer and durability wait

use super::strategy::LoggingStrategy;
use crate::wal::{LogRecord, LogRecordType, TupleHeader};
use crate::{LoggingType, Oid, Result, TileLogError, TransactionId, Tuple, TupleLocation};
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::warn;

/// Buffers the records of one transaction-executing thread.
///
/// Only the owning thread appends; the frontend logger takes the buffer
/// during a drain and later reports how far the records are durable.
pub struct BackendLogger {
    id: u64,
    logging_type: LoggingType,
    thread: ThreadId,
    strategy: Arc<dyn LoggingStrategy>,
    wake: Sender<()>,
    state: Mutex<BackendState>,
    flushed: Condvar,
}

#[derive(Default)]
struct BackendState {
    buffer: Vec<LogRecord>,
    /// Records handed to `log` so far
    emitted: u64,
    /// Records known to be in the sink
    durable: u64,
    failure: Option<String>,
    released: bool,
}

impl BackendLogger {
    pub(crate) fn new(
        id: u64,
        thread: ThreadId,
        strategy: Arc<dyn LoggingStrategy>,
        wake: Sender<()>,
    ) -> Self {
        Self {
            id,
            logging_type: strategy.logging_type(),
            thread,
            strategy,
            wake,
            state: Mutex::new(BackendState::default()),
            flushed: Condvar::new(),
        }
    }

    /// Registry id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Logging type this logger is registered under
    pub fn logging_type(&self) -> LoggingType {
        self.logging_type
    }

    /// Thread that owns this logger
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Append a record to the buffer. Never blocks on I/O.
    pub fn log(&self, record: LogRecord) {
        let nudge = self.strategy.nudge_on(&record);
        {
            let mut state = self.state.lock();
            if state.released {
                warn!(
                    "Backend logger {} is detached; dropping {:?} record",
                    self.id,
                    record.record_type()
                );
                return;
            }
            state.buffer.push(record);
            state.emitted += 1;
        }
        if nudge {
            self.nudge();
        }
    }

    /// Build a tuple record. INSERT uses `new_location` only, DELETE uses
    /// `old_location` only, UPDATE uses both; INSERT and UPDATE need a tuple.
    #[allow(clippy::too_many_arguments)]
    pub fn get_tuple_record(
        &self,
        kind: LogRecordType,
        txn_id: TransactionId,
        table_id: Oid,
        new_location: TupleLocation,
        old_location: TupleLocation,
        tuple: Option<&Tuple>,
        database_id: Oid,
    ) -> Result<LogRecord> {
        let header = TupleHeader {
            txn_id,
            database_id,
            table_id,
        };
        let payload = |kind: LogRecordType| match tuple {
            Some(tuple) => LogRecord::encode_tuple(tuple),
            None => Err(TileLogError::InvalidRecord(format!("{:?} requires a tuple", kind))),
        };

        match kind {
            LogRecordType::TupleInsert => Ok(LogRecord::Insert {
                header,
                location: new_location,
                payload: payload(kind)?,
            }),
            LogRecordType::TupleUpdate => Ok(LogRecord::Update {
                header,
                old_location,
                new_location,
                payload: payload(kind)?,
            }),
            LogRecordType::TupleDelete => Ok(LogRecord::Delete {
                header,
                location: old_location,
            }),
            LogRecordType::Begin | LogRecordType::Commit | LogRecordType::Abort => Err(
                TileLogError::InvalidRecord(format!("{:?} is not a tuple record", kind)),
            ),
        }
    }

    /// Block until every record logged so far is durable in the sink
    pub fn wait_for_flushing(&self) -> Result<()> {
        let mut state = self.state.lock();
        let target = state.emitted;
        if state.durable >= target {
            return Ok(());
        }

        self.nudge();
        while state.durable < target {
            if let Some(reason) = &state.failure {
                return Err(TileLogError::Durability(reason.clone()));
            }
            if state.released {
                return Err(TileLogError::Durability(format!(
                    "logging session ended with {} of {} records unflushed",
                    target - state.durable,
                    target
                )));
            }
            self.flushed.wait(&mut state);
        }
        Ok(())
    }

    /// Records logged but not yet taken by the frontend
    pub fn pending_count(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Records logged so far
    pub fn emitted(&self) -> u64 {
        self.state.lock().emitted
    }

    /// Records known durable
    pub fn durable(&self) -> u64 {
        self.state.lock().durable
    }

    /// Take the buffer for a drain, with the sequence it covers up to
    pub(crate) fn collect(&self) -> (Vec<LogRecord>, u64) {
        let mut state = self.state.lock();
        let upto = state.emitted;
        (std::mem::take(&mut state.buffer), upto)
    }

    /// Everything up to `upto` reached the sink
    pub(crate) fn mark_durable(&self, upto: u64) {
        let mut state = self.state.lock();
        if upto > state.durable {
            state.durable = upto;
            self.flushed.notify_all();
        }
    }

    /// The sink failed; wake waiters with the reason
    pub(crate) fn fail(&self, reason: &str) {
        let mut state = self.state.lock();
        state.failure.get_or_insert_with(|| reason.to_string());
        state.released = true;
        self.flushed.notify_all();
    }

    /// The session is over; nothing more will be flushed
    pub(crate) fn release(&self) {
        let mut state = self.state.lock();
        state.released = true;
        self.flushed.notify_all();
    }

    fn nudge(&self) {
        // Full means a wakeup is already pending
        let _ = self.wake.try_send(());
    }
}

impl fmt::Debug for BackendLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendLogger")
            .field("id", &self.id)
            .field("logging_type", &self.logging_type)
            .field("thread", &self.thread)
            .finish()
    }
}
