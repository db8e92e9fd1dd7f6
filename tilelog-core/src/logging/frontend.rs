//! Frontend logger: the single consumer that owns the sink

use super::recovery::Replayer;
use super::session::SessionRegistry;
use super::strategy::LoggingStrategy;
use crate::storage::TupleStore;
use crate::wal::{LogReader, LogWriter};
use crate::{LoggingMode, LoggingType, Result, TileLogError};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info};

/// Drains backend loggers into the sink and replays the sink on recovery.
///
/// Runs on the thread that called `start_standby_mode` until the session
/// reaches SLEEP.
pub(crate) struct FrontendLogger {
    logging_type: LoggingType,
    sessions: Arc<SessionRegistry>,
    store: Arc<dyn TupleStore>,
    strategy: Arc<dyn LoggingStrategy>,
    wake: Receiver<()>,
    writer: LogWriter,
}

impl FrontendLogger {
    pub(crate) fn new(
        sessions: Arc<SessionRegistry>,
        store: Arc<dyn TupleStore>,
        strategy: Arc<dyn LoggingStrategy>,
        wake: Receiver<()>,
        writer: LogWriter,
    ) -> Self {
        Self {
            logging_type: strategy.logging_type(),
            sessions,
            store,
            strategy,
            wake,
            writer,
        }
    }

    /// Serve the session until SLEEP; a failure puts the session to sleep
    /// with the error recorded
    pub(crate) fn run(mut self) -> Result<()> {
        let result = self.run_session();
        if let Err(e) = &result {
            error!("{} frontend logger stopped: {}", self.logging_type, e);
            self.sessions.fail(self.logging_type, &e.to_string());
        }
        result
    }

    fn run_session(&mut self) -> Result<()> {
        match self.sessions.wait_while(self.logging_type, LoggingMode::Standby) {
            LoggingMode::Recovery => {
                self.recover()?;
                self.sessions.transition(self.logging_type, LoggingMode::Logging)?;
                self.flush_loop()?;
            }
            LoggingMode::Terminate => {}
            other => {
                return Err(TileLogError::SessionFailed {
                    logging_type: self.logging_type,
                    reason: format!("left STANDBY for {}", other),
                })
            }
        }
        self.terminate()
    }

    fn recover(&mut self) -> Result<()> {
        let scan = LogReader::new(self.writer.path()).read_all()?;
        let redo_all = self.sessions.redo_all(self.logging_type);
        let stats = Replayer::new(self.store.as_ref(), redo_all).replay(&scan)?;

        info!(
            "{} recovery finished: {} records, {} transactions committed{}",
            self.logging_type,
            stats.records_read,
            stats.committed_transactions,
            if redo_all { " (redo all)" } else { "" }
        );
        self.sessions.record_recovery(self.logging_type, stats);
        Ok(())
    }

    fn flush_loop(&mut self) -> Result<()> {
        loop {
            self.wait_for_work();
            self.flush()?;
            if self.sessions.mode(self.logging_type) == LoggingMode::Terminate {
                return Ok(());
            }
        }
    }

    fn wait_for_work(&self) {
        let interval = self.strategy.flush_interval();
        match self.wake.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(interval),
        }
    }

    /// Drain every backend logger, append the batch and force it durable.
    /// Returns the number of records written.
    fn flush(&mut self) -> Result<usize> {
        let targets = self.sessions.drain_targets(self.logging_type);
        let mut batch = Vec::new();
        let mut marks = Vec::with_capacity(targets.len());
        for logger in &targets {
            let (records, upto) = logger.collect();
            batch.extend(records);
            marks.push((logger, upto));
        }

        if !batch.is_empty() {
            let written = self
                .writer
                .append_batch(&batch)
                .and_then(|bytes| self.writer.sync().map(|()| bytes));
            match written {
                Ok(bytes) => debug!(
                    "Flushed {} records ({} bytes) from {} backend loggers",
                    batch.len(),
                    bytes,
                    targets.len()
                ),
                Err(e) => {
                    let reason = format!("flush to {:?} failed: {}", self.writer.path(), e);
                    for logger in &targets {
                        logger.fail(&reason);
                    }
                    return Err(TileLogError::Durability(reason));
                }
            }
        }

        for (logger, upto) in marks {
            logger.mark_durable(upto);
        }
        Ok(batch.len())
    }

    /// Flush until every backend logger has deregistered, then once more
    fn terminate(&mut self) -> Result<()> {
        info!(
            "{} frontend logger terminating with {} backend loggers",
            self.logging_type,
            self.sessions.backend_count(self.logging_type)
        );

        while self.sessions.backend_count(self.logging_type) > 0 {
            self.flush()?;
            self.wait_for_work();
        }
        self.flush()?;

        info!(
            "{} frontend logger wrote {} records in {} syncs",
            self.logging_type,
            self.writer.records_written(),
            self.writer.syncs()
        );
        self.sessions.finish(self.logging_type)
    }
}
