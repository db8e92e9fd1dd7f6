//! Workload driver: builds a log with concurrent backends, then checks
//! that recovery reproduces the committed state

use crate::logging::{LogManager, RecoveryStats};
use crate::storage::{Catalog, DataTable, TupleStore};
use crate::transaction::TransactionManager;
use crate::wal::LogConfig;
use crate::{
    Column, LoggingMode, LoggingType, Oid, Result, Schema, TileLogError, Tuple, TupleLocation,
    Value, ValueType,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// Database the workload writes to
pub const WORKLOAD_DATABASE_OID: Oid = 20000;

/// Table the workload writes to
pub const WORKLOAD_TABLE_OID: Oid = 10000;

const WORKLOAD_TABLE_NAME: &str = "USERTABLE";
const FIELD_LENGTH: usize = 100;

/// Workload knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub logging_type: LoggingType,
    /// Insert transactions per backend
    pub tuple_count: usize,
    /// Concurrent backend threads
    pub backend_count: usize,
    /// Varchar columns after the integer key
    pub column_count: usize,
    /// Updated tuples each backend deletes afterwards
    pub deletes_per_backend: usize,
    /// Abort every n-th insert transaction; 0 never aborts
    pub abort_every: usize,
    /// Transactions per backend left without COMMIT or ABORT
    pub unfinished_per_backend: usize,
    /// Fail the recovery check if the active tuple count is off
    pub check_tuple_count: bool,
    /// Replay every transaction in the log as if committed
    pub redo_all: bool,
    /// Directory holding the log file
    pub log_dir: PathBuf,
    /// Slots per tile group
    pub tuples_per_tile_group: u32,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            logging_type: LoggingType::Aries,
            tuple_count: 100,
            backend_count: 2,
            column_count: 10,
            deletes_per_backend: 1,
            abort_every: 0,
            unfinished_per_backend: 0,
            check_tuple_count: false,
            redo_all: false,
            log_dir: PathBuf::from("/tmp"),
            tuples_per_tile_group: crate::config::TUPLES_PER_TILE_GROUP,
        }
    }
}

impl WorkloadConfig {
    /// Log file of the configured logging type inside `log_dir`
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(self.logging_type.default_log_file_name())
    }

    /// Integer key followed by `column_count` varchar fields
    pub fn schema(&self) -> Schema {
        let mut columns = vec![Column::new("YCSB_KEY", ValueType::Integer, 8)];
        columns.extend(
            (0..self.column_count)
                .map(|i| Column::new(format!("FIELD{}", i), ValueType::Varchar, FIELD_LENGTH)),
        );
        Schema::new(columns)
    }

    fn committed_inserts(&self) -> usize {
        match self.abort_every {
            0 => self.tuple_count,
            n => self.tuple_count - self.tuple_count / n,
        }
    }

    fn deletes(&self) -> usize {
        self.deletes_per_backend.min(self.committed_inserts())
    }

    /// Live tuples in memory right after the log is built
    pub fn expected_live_tuples(&self) -> usize {
        let per_backend =
            self.committed_inserts() - self.deletes() + self.unfinished_per_backend;
        per_backend * self.backend_count
    }

    /// Live tuples after recovering the log
    pub fn expected_recovered_tuples(&self) -> usize {
        let per_backend = if self.redo_all {
            // Aborted and unfinished inserts are replayed too
            self.tuple_count - self.deletes() + self.unfinished_per_backend
        } else {
            self.committed_inserts() - self.deletes()
        };
        per_backend * self.backend_count
    }
}

/// Catalog, log manager and transaction manager wired together
pub struct Engine {
    pub catalog: Arc<Catalog>,
    pub logs: Arc<LogManager>,
    pub txns: Arc<TransactionManager>,
}

impl Engine {
    pub fn new(config: &WorkloadConfig) -> Self {
        let catalog = Arc::new(Catalog::new());
        let store: Arc<dyn TupleStore> = catalog.clone();
        let logs = Arc::new(LogManager::new(LogConfig::in_dir(&config.log_dir), store));
        let txns = Arc::new(TransactionManager::new(logs.clone(), config.logging_type));
        Self {
            catalog,
            logs,
            txns,
        }
    }

    /// The workload table, created along with its database if missing
    pub fn workload_table(&self, config: &WorkloadConfig) -> Result<Arc<DataTable>> {
        let db = self.catalog.get_or_create_database(WORKLOAD_DATABASE_OID);
        match db.get_table(WORKLOAD_TABLE_OID) {
            Ok(table) => Ok(table),
            Err(_) => self.catalog.create_table(
                WORKLOAD_DATABASE_OID,
                WORKLOAD_TABLE_OID,
                WORKLOAD_TABLE_NAME,
                config.schema(),
                config.tuples_per_tile_group,
            ),
        }
    }

    /// Drop the workload table and its database, as the build and
    /// recovery passes leave nothing behind
    pub fn drop_workload_table(&self) -> Result<()> {
        let db = self
            .catalog
            .get_database(WORKLOAD_DATABASE_OID)
            .ok_or(TileLogError::DatabaseNotFound(WORKLOAD_DATABASE_OID))?;
        db.drop_table(WORKLOAD_TABLE_OID)?;
        self.catalog.drop_database(WORKLOAD_DATABASE_OID)
    }
}

/// Outcome of building a log
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub committed: usize,
    pub aborted: usize,
    pub unfinished: usize,
    pub live_tuples: usize,
}

/// Outcome of recovering a log
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub stats: RecoveryStats,
    pub recovered_tuples: usize,
    pub expected_tuples: usize,
}

impl RecoveryReport {
    pub fn is_consistent(&self) -> bool {
        self.recovered_tuples == self.expected_tuples
    }
}

/// Start a session and bring it to LOGGING through recovery
pub fn start_session(engine: &Engine, logging_type: LoggingType) -> Result<JoinHandle<Result<()>>> {
    let handle = engine.logs.spawn_frontend(logging_type)?;

    let ready = engine
        .logs
        .wait_for_mode(LoggingMode::Standby, logging_type)
        .and_then(|()| engine.logs.start_recovery_mode(logging_type))
        .and_then(|()| engine.logs.wait_for_mode(LoggingMode::Logging, logging_type));
    if let Err(e) = ready {
        // The frontend thread carries the root cause
        let _ = engine.logs.request_termination(logging_type);
        return Err(join_frontend(logging_type, handle).err().unwrap_or(e));
    }

    if let Some(max_txn_id) = engine
        .logs
        .recovery_stats(logging_type)
        .and_then(|stats| stats.max_txn_id)
    {
        engine.txns.advance_past(max_txn_id);
    }
    Ok(handle)
}

/// End the session and join its frontend thread
pub fn stop_session(
    engine: &Engine,
    logging_type: LoggingType,
    handle: JoinHandle<Result<()>>,
) -> Result<()> {
    let ended = engine.logs.end_logging(logging_type);
    join_frontend(logging_type, handle)?;
    if !ended {
        return Err(TileLogError::SessionFailed {
            logging_type,
            reason: "session did not reach SLEEP".to_string(),
        });
    }
    Ok(())
}

fn join_frontend(logging_type: LoggingType, handle: JoinHandle<Result<()>>) -> Result<()> {
    handle.join().map_err(|_| TileLogError::SessionFailed {
        logging_type,
        reason: "frontend logger thread panicked".to_string(),
    })?
}

/// Build a fresh log by running the workload on every backend
pub fn prepare_log_file(engine: &Engine, config: &WorkloadConfig) -> Result<BuildReport> {
    let log_file = config.log_file();
    match fs::remove_file(&log_file) {
        Ok(()) => info!("Removed previous log file {:?}", log_file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let table = engine.workload_table(config)?;
    engine
        .logs
        .set_log_file_name(config.logging_type, &log_file)?;
    let handle = start_session(engine, config.logging_type)?;

    let results: Vec<Result<BuildReport>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..config.backend_count)
            .map(|backend| {
                let table = table.clone();
                scope.spawn(move || run_backend(engine, config, &table, backend))
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| {
                worker.join().unwrap_or_else(|_| {
                    Err(TileLogError::SessionFailed {
                        logging_type: config.logging_type,
                        reason: "backend thread panicked".to_string(),
                    })
                })
            })
            .collect()
    });

    let stopped = stop_session(engine, config.logging_type, handle);
    let mut report = BuildReport::default();
    for result in results {
        let backend = result?;
        report.committed += backend.committed;
        report.aborted += backend.aborted;
        report.unfinished += backend.unfinished;
    }
    stopped?;

    report.live_tuples = table.active_tuple_count();
    engine.drop_workload_table()?;
    info!(
        "Built {:?}: {} committed, {} aborted, {} unfinished, {} live tuples",
        log_file, report.committed, report.aborted, report.unfinished, report.live_tuples
    );
    Ok(report)
}

/// One backend: inserts, updates of every committed insert, deletes of
/// the first few updated tuples, then transactions that never finish
fn run_backend(
    engine: &Engine,
    config: &WorkloadConfig,
    table: &DataTable,
    backend: usize,
) -> Result<BuildReport> {
    let logger = engine.logs.get_backend_logger(config.logging_type)?;
    let result = run_transactions(engine, config, table, backend);

    // Deregister even on failure so termination is not held up
    let flushed = logger.wait_for_flushing();
    engine.logs.remove_backend_logger(&logger)?;
    let report = result?;
    flushed?;
    Ok(report)
}

fn run_transactions(
    engine: &Engine,
    config: &WorkloadConfig,
    table: &DataTable,
    backend: usize,
) -> Result<BuildReport> {
    let mut rng = rand::thread_rng();
    let mut report = BuildReport::default();
    let (db, tb) = (WORKLOAD_DATABASE_OID, WORKLOAD_TABLE_OID);
    let key_base = (backend * config.tuple_count) as i64;

    let mut locations: Vec<TupleLocation> = Vec::new();
    for i in 0..config.tuple_count {
        let txn = engine.txns.begin_transaction();
        let tuple = random_tuple(&mut rng, config, key_base + i as i64);
        let location = table.insert_tuple(tuple.clone())?;
        txn.log_insert(db, tb, location, &tuple)?;

        if config.abort_every > 0 && (i + 1) % config.abort_every == 0 {
            table.delete_tuple(location)?;
            engine.txns.abort_transaction(txn);
            report.aborted += 1;
        } else {
            engine.txns.commit_transaction(txn)?;
            locations.push(location);
            report.committed += 1;
        }
    }

    for (i, location) in locations.iter_mut().enumerate() {
        let txn = engine.txns.begin_transaction();
        let tuple = random_tuple(&mut rng, config, key_base + i as i64);
        table.delete_tuple(*location)?;
        let moved = table.insert_tuple(tuple.clone())?;
        txn.log_update(db, tb, *location, moved, &tuple)?;
        engine.txns.commit_transaction(txn)?;
        *location = moved;
        report.committed += 1;
    }

    for location in locations.iter().take(config.deletes_per_backend) {
        let txn = engine.txns.begin_transaction();
        table.delete_tuple(*location)?;
        txn.log_delete(db, tb, *location)?;
        engine.txns.commit_transaction(txn)?;
        report.committed += 1;
    }

    // Crash simulation: records reach the log without a COMMIT
    for i in 0..config.unfinished_per_backend {
        let txn = engine.txns.begin_transaction();
        let tuple = random_tuple(&mut rng, config, -(key_base + i as i64) - 1);
        let location = table.insert_tuple(tuple.clone())?;
        txn.log_insert(db, tb, location, &tuple)?;
        report.unfinished += 1;
    }
    Ok(report)
}

fn random_tuple(rng: &mut impl Rng, config: &WorkloadConfig, key: i64) -> Tuple {
    let mut values = vec![Value::Integer(key)];
    values.extend((0..config.column_count).map(|_| {
        let len = rng.gen_range(1..=FIELD_LENGTH);
        let field: String = (0..len).map(|_| char::from(rng.sample(Alphanumeric))).collect();
        Value::Varchar(field)
    }));
    Tuple::new(values)
}

/// Forget every table, transaction id and logging session, as after a restart
pub fn reset_system(engine: &Engine) -> Result<()> {
    engine.catalog.reset();
    engine.txns.reset_states();
    engine.logs.reset_states()
}

/// Restart from scratch and recover the log into an empty table
pub fn check_recovery(engine: &Engine, config: &WorkloadConfig) -> Result<RecoveryReport> {
    reset_system(engine)?;
    let table = engine.workload_table(config)?;
    engine
        .logs
        .set_log_file_name(config.logging_type, config.log_file())?;
    engine
        .logs
        .set_test_redo_all_logs(config.logging_type, config.redo_all)?;

    let handle = start_session(engine, config.logging_type)?;
    let stats = engine
        .logs
        .recovery_stats(config.logging_type)
        .unwrap_or_default();
    let recovered_tuples = table.active_tuple_count();
    stop_session(engine, config.logging_type, handle)?;
    engine.drop_workload_table()?;

    let report = RecoveryReport {
        stats,
        recovered_tuples,
        expected_tuples: config.expected_recovered_tuples(),
    };
    if config.check_tuple_count && !report.is_consistent() {
        warn!(
            "Recovered {} tuples, expected {}",
            report.recovered_tuples, report.expected_tuples
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::LogReader;
    use tempfile::TempDir;

    fn config(dir: &TempDir, logging_type: LoggingType) -> WorkloadConfig {
        WorkloadConfig {
            logging_type,
            log_dir: dir.path().to_path_buf(),
            column_count: 3,
            check_tuple_count: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_scenario() {
        for logging_type in [LoggingType::Aries, LoggingType::Alternative] {
            let dir = TempDir::new().unwrap();
            let config = config(&dir, logging_type);
            let engine = Engine::new(&config);

            let built = prepare_log_file(&engine, &config).unwrap();
            assert_eq!(built.live_tuples, 198);
            assert_eq!(built.live_tuples, config.expected_live_tuples());
            assert!(engine.catalog.get_database(WORKLOAD_DATABASE_OID).is_none());

            let recovered = check_recovery(&engine, &config).unwrap();
            assert_eq!(recovered.recovered_tuples, 198);
            assert!(engine.catalog.get_database(WORKLOAD_DATABASE_OID).is_none());
            assert!(recovered.is_consistent());
            assert_eq!(recovered.stats.skipped_transactions, 0);
        }
    }

    #[test]
    fn test_aborted_transactions_not_recovered() {
        let dir = TempDir::new().unwrap();
        let config = WorkloadConfig {
            tuple_count: 20,
            abort_every: 5,
            ..config(&dir, LoggingType::Aries)
        };
        let engine = Engine::new(&config);

        let built = prepare_log_file(&engine, &config).unwrap();
        assert_eq!(built.aborted, 8);

        let recovered = check_recovery(&engine, &config).unwrap();
        // 16 committed inserts minus one delete, per backend
        assert_eq!(recovered.recovered_tuples, 30);
        assert_eq!(recovered.stats.aborted_transactions, 8);
    }

    #[test]
    fn test_unfinished_transactions_skipped() {
        let dir = TempDir::new().unwrap();
        let config = WorkloadConfig {
            tuple_count: 10,
            unfinished_per_backend: 3,
            ..config(&dir, LoggingType::Alternative)
        };
        let engine = Engine::new(&config);

        let built = prepare_log_file(&engine, &config).unwrap();
        assert_eq!(built.live_tuples, (10 - 1 + 3) * 2);

        let recovered = check_recovery(&engine, &config).unwrap();
        assert_eq!(recovered.recovered_tuples, (10 - 1) * 2);
        assert_eq!(recovered.stats.skipped_transactions, 6);
    }

    #[test]
    fn test_redo_all_replays_everything() {
        let dir = TempDir::new().unwrap();
        let mut config = WorkloadConfig {
            tuple_count: 10,
            abort_every: 5,
            unfinished_per_backend: 2,
            ..config(&dir, LoggingType::Aries)
        };
        let engine = Engine::new(&config);
        prepare_log_file(&engine, &config).unwrap();

        config.redo_all = true;
        let recovered = check_recovery(&engine, &config).unwrap();
        assert_eq!(recovered.recovered_tuples, (10 - 1 + 2) * 2);
        assert!(recovered.is_consistent());
    }

    #[test]
    fn test_recovery_twice_is_stable() {
        let dir = TempDir::new().unwrap();
        let config = WorkloadConfig {
            tuple_count: 15,
            ..config(&dir, LoggingType::Aries)
        };
        let engine = Engine::new(&config);
        prepare_log_file(&engine, &config).unwrap();

        let first = check_recovery(&engine, &config).unwrap();
        let records = LogReader::new(config.log_file()).read_all().unwrap().records.len();
        let second = check_recovery(&engine, &config).unwrap();

        assert_eq!(first.recovered_tuples, second.recovered_tuples);
        assert_eq!(first.stats, second.stats);
        // Recovery sessions append nothing
        assert_eq!(
            LogReader::new(config.log_file()).read_all().unwrap().records.len(),
            records
        );
    }

    #[test]
    fn test_drop_workload_table() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, LoggingType::Aries);
        let engine = Engine::new(&config);

        assert!(matches!(
            engine.drop_workload_table(),
            Err(TileLogError::DatabaseNotFound(WORKLOAD_DATABASE_OID))
        ));
        engine.workload_table(&config).unwrap();
        engine.drop_workload_table().unwrap();
        assert!(engine.catalog.get_database(WORKLOAD_DATABASE_OID).is_none());

        // Recreated from scratch afterwards
        let table = engine.workload_table(&config).unwrap();
        assert_eq!(table.active_tuple_count(), 0);
    }

    #[test]
    fn test_new_session_continues_transaction_ids() {
        let dir = TempDir::new().unwrap();
        let config = WorkloadConfig {
            tuple_count: 5,
            backend_count: 1,
            ..config(&dir, LoggingType::Aries)
        };
        let engine = Engine::new(&config);
        prepare_log_file(&engine, &config).unwrap();

        reset_system(&engine).unwrap();
        engine.workload_table(&config).unwrap();
        let handle = start_session(&engine, config.logging_type).unwrap();
        let max = engine
            .logs
            .recovery_stats(config.logging_type)
            .and_then(|s| s.max_txn_id)
            .unwrap();
        assert!(engine.txns.next_transaction_id() > max);
        stop_session(&engine, config.logging_type, handle).unwrap();
    }
}
