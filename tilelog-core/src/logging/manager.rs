//! Log manager: the control surface of the logging subsystem

use super::backend::BackendLogger;
use super::frontend::FrontendLogger;
use super::recovery::RecoveryStats;
use super::session::SessionRegistry;
use super::strategy::{strategy_for, LoggingStrategy};
use crate::storage::TupleStore;
use crate::wal::{LogConfig, LogWriter};
use crate::{LoggingMode, LoggingType, Result, TileLogError};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// A session reserved in INVALID mode whose frontend has not run yet
struct Reservation {
    log_file: PathBuf,
    strategy: Arc<dyn LoggingStrategy>,
    wake: Receiver<()>,
}

/// Coordinates frontend loggers, backend loggers and the per-type mode
/// state machine.
///
/// Shared as `Arc<LogManager>` between the control threads, the frontend
/// threads and every transaction-executing thread.
pub struct LogManager {
    config: Mutex<LogConfig>,
    sessions: Arc<SessionRegistry>,
    store: Arc<dyn TupleStore>,
}

impl LogManager {
    /// Create a manager that recovers into `store`
    pub fn new(config: LogConfig, store: Arc<dyn TupleStore>) -> Self {
        Self {
            config: Mutex::new(config),
            sessions: Arc::new(SessionRegistry::new()),
            store,
        }
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> LogConfig {
        self.config.lock().clone()
    }

    /// Point future sessions of `logging_type` at another sink
    pub fn set_log_file_name(&self, logging_type: LoggingType, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if self.sessions.is_live(logging_type) {
            return Err(TileLogError::Config(format!(
                "cannot switch {} log file to {:?} while its frontend logger is active",
                logging_type, path
            )));
        }
        info!("{} log file set to {:?}", logging_type, path);
        self.config.lock().log_files.insert(logging_type, path);
        Ok(())
    }

    /// Current sink path of `logging_type`
    pub fn log_file_name(&self, logging_type: LoggingType) -> PathBuf {
        self.config.lock().log_file(logging_type)
    }

    /// Open the sink, enter STANDBY and run the frontend logger on the
    /// calling thread until the session reaches SLEEP.
    ///
    /// Other threads observe readiness with
    /// `wait_for_mode(LoggingMode::Standby, ty)`.
    pub fn start_standby_mode(&self, logging_type: LoggingType) -> Result<()> {
        let reservation = self.reserve(logging_type)?;
        self.run_frontend(logging_type, reservation)
    }

    /// Run `start_standby_mode` on a dedicated thread.
    ///
    /// The session is reserved before the thread starts, so a
    /// `wait_for_mode` right after this call never sees an older session.
    pub fn spawn_frontend(
        self: &Arc<Self>,
        logging_type: LoggingType,
    ) -> Result<JoinHandle<Result<()>>> {
        let reservation = self.reserve(logging_type)?;
        let manager = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("frontend-{}", logging_type.to_string().to_lowercase()))
            .spawn(move || manager.run_frontend(logging_type, reservation));
        match spawned {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.sessions.fail(logging_type, &e.to_string());
                Err(e.into())
            }
        }
    }

    fn reserve(&self, logging_type: LoggingType) -> Result<Reservation> {
        let config = self.config();
        let log_file = config.log_file(logging_type);
        let strategy = strategy_for(logging_type, &config);
        let wake = self
            .sessions
            .begin_session(logging_type, &log_file, strategy.clone())?;
        Ok(Reservation {
            log_file,
            strategy,
            wake,
        })
    }

    fn run_frontend(&self, logging_type: LoggingType, reservation: Reservation) -> Result<()> {
        let writer = match LogWriter::open(&reservation.log_file) {
            Ok(writer) => writer,
            Err(e) => {
                self.sessions.fail(logging_type, &e.to_string());
                return Err(e);
            }
        };
        self.sessions.transition(logging_type, LoggingMode::Standby)?;

        FrontendLogger::new(
            self.sessions.clone(),
            self.store.clone(),
            reservation.strategy,
            reservation.wake,
            writer,
        )
        .run()
    }

    /// Block until `logging_type` reaches `mode`, or fail if its session died
    pub fn wait_for_mode(&self, mode: LoggingMode, logging_type: LoggingType) -> Result<()> {
        self.sessions.wait_for_mode(logging_type, mode)
    }

    /// STANDBY -> RECOVERY; the frontend replays the sink and then enters LOGGING
    pub fn start_recovery_mode(&self, logging_type: LoggingType) -> Result<()> {
        self.sessions.transition(logging_type, LoggingMode::Recovery)
    }

    /// Treat every transaction in the sink as committed during the next
    /// recovery. Only legal before recovery starts.
    pub fn set_test_redo_all_logs(&self, logging_type: LoggingType, enabled: bool) -> Result<()> {
        self.sessions.set_redo_all(logging_type, enabled)
    }

    /// Backend logger of the calling thread
    pub fn get_backend_logger(&self, logging_type: LoggingType) -> Result<Arc<BackendLogger>> {
        self.sessions.register_backend(logging_type)
    }

    /// Deregister a backend logger. Records it still buffers are written
    /// by the next flush.
    pub fn remove_backend_logger(&self, logger: &Arc<BackendLogger>) -> Result<()> {
        self.sessions.remove_backend(logger)
    }

    /// Whether transactions of `logging_type` may log
    pub fn is_in_logging_mode(&self, logging_type: LoggingType) -> bool {
        self.sessions.mode(logging_type) == LoggingMode::Logging
    }

    /// Current mode
    pub fn mode(&self, logging_type: LoggingType) -> LoggingMode {
        self.sessions.mode(logging_type)
    }

    /// Modes the current session has passed through
    pub fn mode_history(&self, logging_type: LoggingType) -> Vec<LoggingMode> {
        self.sessions.mode_history(logging_type)
    }

    /// Frontend loggers that have not reached SLEEP
    pub fn active_frontend_logger_count(&self) -> usize {
        self.sessions.active_count()
    }

    /// Whether commit must wait for its records to be durable
    pub fn commit_waits_for_durability(&self, logging_type: LoggingType) -> bool {
        match self.sessions.strategy(logging_type) {
            Some(strategy) => strategy.commit_waits_for_durability(),
            None => strategy_for(logging_type, &self.config()).commit_waits_for_durability(),
        }
    }

    /// Why the current session of `logging_type` died, if it did
    pub fn failure(&self, logging_type: LoggingType) -> Option<String> {
        self.sessions.failure(logging_type)
    }

    /// Summary of the last recovery for `logging_type`
    pub fn recovery_stats(&self, logging_type: LoggingType) -> Option<RecoveryStats> {
        self.sessions.recovery_stats(logging_type)
    }

    /// Ask the frontend to terminate without waiting for SLEEP
    pub fn request_termination(&self, logging_type: LoggingType) -> Result<()> {
        self.sessions.terminate(logging_type)
    }

    /// Terminate the session and wait until it sleeps. Returns false if
    /// there was no session to end or it ended in failure.
    pub fn end_logging(&self, logging_type: LoggingType) -> bool {
        if let Err(e) = self.request_termination(logging_type) {
            warn!("Cannot end {} logging: {}", logging_type, e);
            return false;
        }
        match self.sessions.wait_for_mode(logging_type, LoggingMode::Sleep) {
            Ok(()) => true,
            Err(e) => {
                warn!("{} logging did not shut down cleanly: {}", logging_type, e);
                false
            }
        }
    }

    /// Forget finished sessions, pending flags and failures
    pub fn reset_states(&self) -> Result<()> {
        self.sessions.reset()
    }
}
