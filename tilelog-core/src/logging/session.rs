//! Per-logging-type session state shared by the manager, the frontend
//! logger and transaction threads

use super::backend::BackendLogger;
use super::recovery::RecoveryStats;
use super::strategy::LoggingStrategy;
use crate::{LoggingMode, LoggingType, Result, TileLogError};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info};

/// Whether a session may move from `from` to `to`
fn is_legal(from: LoggingMode, to: LoggingMode) -> bool {
    use LoggingMode::*;
    matches!(
        (from, to),
        (Invalid, Standby)
            | (Standby, Recovery)
            | (Recovery, Logging)
            | (Logging, Terminate)
            | (Standby, Terminate)
            | (Terminate, Sleep)
    )
}

/// One frontend logger's lifetime, from STANDBY to SLEEP
struct Session {
    mode: LoggingMode,
    history: Vec<LoggingMode>,
    log_file: PathBuf,
    redo_all: bool,
    failure: Option<String>,
    /// Registered backend loggers, in registration order
    backends: Vec<Arc<BackendLogger>>,
    /// Removed loggers that still buffer records
    retired: Vec<Arc<BackendLogger>>,
    wake: Sender<()>,
    strategy: Arc<dyn LoggingStrategy>,
    recovery: Option<RecoveryStats>,
}

impl Session {
    /// Reserved, opening, or running
    fn is_live(&self) -> bool {
        self.mode != LoggingMode::Sleep
    }

    fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
        self.history.push(mode);
    }

    fn release_backends(&mut self) {
        for logger in self.backends.drain(..).chain(self.retired.drain(..)) {
            logger.release();
        }
    }
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<LoggingType, Session>,
    pending_redo_all: HashSet<LoggingType>,
    next_logger_id: u64,
}

impl RegistryState {
    fn mode(&self, logging_type: LoggingType) -> LoggingMode {
        self.sessions
            .get(&logging_type)
            .map_or(LoggingMode::Invalid, |s| s.mode)
    }
}

/// Mode state machine and backend registry for every logging type.
///
/// Lock order: the registry lock may be held while taking a backend
/// logger's lock, never the other way round.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    state: Mutex<RegistryState>,
    changed: Condvar,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reserve a new session for `logging_type`; it stays INVALID until
    /// the sink is open. Returns the frontend's wake receiver.
    pub(crate) fn begin_session(
        &self,
        logging_type: LoggingType,
        log_file: &Path,
        strategy: Arc<dyn LoggingStrategy>,
    ) -> Result<Receiver<()>> {
        let mut state = self.state.lock();

        if let Some(session) = state.sessions.get(&logging_type).filter(|s| s.is_live()) {
            return Err(TileLogError::InvalidTransition {
                logging_type,
                from: session.mode,
                to: LoggingMode::Standby,
            });
        }
        if let Some((other, _)) = state
            .sessions
            .iter()
            .find(|(_, s)| s.is_live() && s.log_file.as_path() == log_file)
        {
            return Err(TileLogError::Config(format!(
                "log file {:?} is already in use by {}",
                log_file, other
            )));
        }

        let redo_all = state.pending_redo_all.remove(&logging_type);
        let (wake, wake_rx) = bounded(1);
        state.sessions.insert(
            logging_type,
            Session {
                mode: LoggingMode::Invalid,
                history: vec![LoggingMode::Invalid],
                log_file: log_file.to_path_buf(),
                redo_all,
                failure: None,
                backends: Vec::new(),
                retired: Vec::new(),
                wake,
                strategy,
                recovery: None,
            },
        );
        self.changed.notify_all();
        Ok(wake_rx)
    }

    /// Move `logging_type` to `to` if the state machine allows it
    pub(crate) fn transition(&self, logging_type: LoggingType, to: LoggingMode) -> Result<()> {
        let mut state = self.state.lock();
        let from = state.mode(logging_type);
        let session = match state.sessions.get_mut(&logging_type) {
            Some(session) if is_legal(from, to) => session,
            _ => {
                return Err(TileLogError::InvalidTransition {
                    logging_type,
                    from,
                    to,
                })
            }
        };

        session.set_mode(to);
        if to == LoggingMode::Terminate {
            let _ = session.wake.try_send(());
        }
        info!("{} logging: {} -> {}", logging_type, from, to);
        self.changed.notify_all();
        Ok(())
    }

    /// Record a fatal failure and put the session to sleep
    pub(crate) fn fail(&self, logging_type: LoggingType, reason: &str) {
        let mut state = self.state.lock();
        let Some(session) = state.sessions.get_mut(&logging_type) else {
            return;
        };
        if !session.is_live() {
            return;
        }

        error!(
            "{} logging failed in {} mode: {}",
            logging_type, session.mode, reason
        );
        session.failure = Some(reason.to_string());
        for logger in session.backends.drain(..).chain(session.retired.drain(..)) {
            logger.fail(reason);
        }
        session.set_mode(LoggingMode::Sleep);
        self.changed.notify_all();
    }

    /// Move TERMINATE to SLEEP and detach whatever loggers remain
    pub(crate) fn finish(&self, logging_type: LoggingType) -> Result<()> {
        let mut state = self.state.lock();
        let from = state.mode(logging_type);
        let session = match state.sessions.get_mut(&logging_type) {
            Some(session) if from == LoggingMode::Terminate => session,
            _ => {
                return Err(TileLogError::InvalidTransition {
                    logging_type,
                    from,
                    to: LoggingMode::Sleep,
                })
            }
        };

        session.release_backends();
        session.set_mode(LoggingMode::Sleep);
        info!("{} logging: {} -> {}", logging_type, from, LoggingMode::Sleep);
        self.changed.notify_all();
        Ok(())
    }

    /// Current mode, INVALID if no session was ever started
    pub(crate) fn mode(&self, logging_type: LoggingType) -> LoggingMode {
        self.state.lock().mode(logging_type)
    }

    /// Modes the current session has been in, oldest first
    pub(crate) fn mode_history(&self, logging_type: LoggingType) -> Vec<LoggingMode> {
        self.state
            .lock()
            .sessions
            .get(&logging_type)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    /// Failure recorded by the current session
    pub(crate) fn failure(&self, logging_type: LoggingType) -> Option<String> {
        self.state
            .lock()
            .sessions
            .get(&logging_type)
            .and_then(|s| s.failure.clone())
    }

    /// Block until the session reaches `target`.
    ///
    /// Returns at once if the session already went through `target`. A
    /// failed session returns its failure, and a session that moved past
    /// `target` without entering it (up to SLEEP at the latest) returns
    /// `SessionEnded`. With no session yet, waits for one to be reserved.
    pub(crate) fn wait_for_mode(&self, logging_type: LoggingType, target: LoggingMode) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            match state.sessions.get(&logging_type) {
                None if target == LoggingMode::Invalid => return Ok(()),
                None => {}
                Some(session) => {
                    if let Some(reason) = &session.failure {
                        return Err(TileLogError::SessionFailed {
                            logging_type,
                            reason: reason.clone(),
                        });
                    }
                    if session.history.contains(&target) {
                        return Ok(());
                    }
                    // Modes only move forward
                    if session.mode > target {
                        return Err(TileLogError::SessionEnded {
                            logging_type,
                            target,
                            mode: session.mode,
                        });
                    }
                }
            }
            self.changed.wait(&mut state);
        }
    }

    /// Block while the session sits in `mode`; returns the mode it left for
    pub(crate) fn wait_while(&self, logging_type: LoggingType, mode: LoggingMode) -> LoggingMode {
        let mut state = self.state.lock();
        loop {
            let current = state.mode(logging_type);
            if current != mode {
                return current;
            }
            self.changed.wait(&mut state);
        }
    }

    /// Ask the frontend to terminate, waiting out RECOVERY first
    pub(crate) fn terminate(&self, logging_type: LoggingType) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            let Some(session) = state.sessions.get_mut(&logging_type) else {
                return Err(TileLogError::InvalidTransition {
                    logging_type,
                    from: LoggingMode::Invalid,
                    to: LoggingMode::Terminate,
                });
            };
            if let Some(reason) = &session.failure {
                return Err(TileLogError::SessionFailed {
                    logging_type,
                    reason: reason.clone(),
                });
            }

            match session.mode {
                LoggingMode::Invalid | LoggingMode::Recovery => {}
                LoggingMode::Terminate => return Ok(()),
                LoggingMode::Standby | LoggingMode::Logging => {
                    let from = session.mode;
                    session.set_mode(LoggingMode::Terminate);
                    let _ = session.wake.try_send(());
                    info!("{} logging: {} -> {}", logging_type, from, LoggingMode::Terminate);
                    self.changed.notify_all();
                    return Ok(());
                }
                LoggingMode::Sleep => {
                    return Err(TileLogError::InvalidTransition {
                        logging_type,
                        from: LoggingMode::Sleep,
                        to: LoggingMode::Terminate,
                    })
                }
            }
            self.changed.wait(&mut state);
        }
    }

    /// The calling thread's backend logger, registering one if needed
    pub(crate) fn register_backend(&self, logging_type: LoggingType) -> Result<Arc<BackendLogger>> {
        let mut state = self.state.lock();
        let mode = state.mode(logging_type);
        if mode != LoggingMode::Logging {
            return Err(TileLogError::NotLogging { logging_type, mode });
        }

        let thread = thread::current().id();
        let id = state.next_logger_id;
        let Some(session) = state.sessions.get_mut(&logging_type) else {
            return Err(TileLogError::NotLogging { logging_type, mode });
        };
        if let Some(existing) = session.backends.iter().find(|l| l.thread() == thread) {
            return Ok(existing.clone());
        }

        let logger = Arc::new(BackendLogger::new(
            id,
            thread,
            session.strategy.clone(),
            session.wake.clone(),
        ));
        session.backends.push(logger.clone());
        let registered = session.backends.len();
        state.next_logger_id += 1;

        debug!(
            "Registered backend logger {} for {} ({} registered)",
            id, logging_type, registered
        );
        Ok(logger)
    }

    /// Deregister a backend logger; buffered records are kept for the next drain
    pub(crate) fn remove_backend(&self, logger: &Arc<BackendLogger>) -> Result<()> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(&logger.logging_type())
            .filter(|s| s.is_live())
            .ok_or(TileLogError::UnknownLogger(logger.id()))?;
        let index = session
            .backends
            .iter()
            .position(|l| Arc::ptr_eq(l, logger))
            .ok_or(TileLogError::UnknownLogger(logger.id()))?;

        let removed = session.backends.remove(index);
        if removed.pending_count() > 0 {
            session.retired.push(removed);
        }
        let _ = session.wake.try_send(());

        debug!(
            "Removed backend logger {} from {} ({} registered)",
            logger.id(),
            logger.logging_type(),
            session.backends.len()
        );
        self.changed.notify_all();
        Ok(())
    }

    /// Loggers to drain: registered ones in order, then retired ones
    pub(crate) fn drain_targets(&self, logging_type: LoggingType) -> Vec<Arc<BackendLogger>> {
        let mut state = self.state.lock();
        match state.sessions.get_mut(&logging_type) {
            Some(session) => {
                let mut targets = session.backends.clone();
                targets.append(&mut session.retired);
                targets
            }
            None => Vec::new(),
        }
    }

    /// Number of registered backend loggers
    pub(crate) fn backend_count(&self, logging_type: LoggingType) -> usize {
        self.state
            .lock()
            .sessions
            .get(&logging_type)
            .map_or(0, |s| s.backends.len())
    }

    /// Set the redo-all flag; only before recovery has started
    pub(crate) fn set_redo_all(&self, logging_type: LoggingType, enabled: bool) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.sessions.get_mut(&logging_type).filter(|s| s.is_live()) {
            Some(session)
                if matches!(session.mode, LoggingMode::Invalid | LoggingMode::Standby) =>
            {
                session.redo_all = enabled;
            }
            Some(session) => {
                return Err(TileLogError::InvalidTransition {
                    logging_type,
                    from: session.mode,
                    to: LoggingMode::Standby,
                })
            }
            None if enabled => {
                state.pending_redo_all.insert(logging_type);
            }
            None => {
                state.pending_redo_all.remove(&logging_type);
            }
        }
        Ok(())
    }

    pub(crate) fn redo_all(&self, logging_type: LoggingType) -> bool {
        let state = self.state.lock();
        match state.sessions.get(&logging_type).filter(|s| s.is_live()) {
            Some(session) => session.redo_all,
            None => state.pending_redo_all.contains(&logging_type),
        }
    }

    pub(crate) fn record_recovery(&self, logging_type: LoggingType, stats: RecoveryStats) {
        if let Some(session) = self.state.lock().sessions.get_mut(&logging_type) {
            session.recovery = Some(stats);
        }
    }

    pub(crate) fn recovery_stats(&self, logging_type: LoggingType) -> Option<RecoveryStats> {
        self.state
            .lock()
            .sessions
            .get(&logging_type)
            .and_then(|s| s.recovery.clone())
    }

    /// Strategy of the current session
    pub(crate) fn strategy(&self, logging_type: LoggingType) -> Option<Arc<dyn LoggingStrategy>> {
        self.state
            .lock()
            .sessions
            .get(&logging_type)
            .map(|s| s.strategy.clone())
    }

    /// Whether `logging_type` has a session that has not reached SLEEP
    pub(crate) fn is_live(&self, logging_type: LoggingType) -> bool {
        self.state
            .lock()
            .sessions
            .get(&logging_type)
            .is_some_and(|s| s.is_live())
    }

    /// Sessions that have not reached SLEEP
    pub(crate) fn active_count(&self) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .filter(|s| s.is_live())
            .count()
    }

    /// Forget every finished session and pending flag
    pub(crate) fn reset(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some((logging_type, session)) = state.sessions.iter().find(|(_, s)| s.is_live()) {
            return Err(TileLogError::InvalidTransition {
                logging_type: *logging_type,
                from: session.mode,
                to: LoggingMode::Invalid,
            });
        }

        state.sessions.clear();
        state.pending_redo_all.clear();
        self.changed.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::strategy::AriesStrategy;
    use std::time::Duration;

    fn strategy() -> Arc<dyn LoggingStrategy> {
        Arc::new(AriesStrategy::new(Duration::from_millis(1)))
    }

    #[test]
    fn test_transition_table() {
        use LoggingMode::*;
        let modes = [Invalid, Standby, Recovery, Logging, Terminate, Sleep];
        for from in modes {
            for to in modes {
                if is_legal(from, to) {
                    assert!(to > from, "{} -> {} goes backwards", from, to);
                }
            }
        }
        assert!(is_legal(Standby, Terminate));
        assert!(!is_legal(Invalid, Logging));
        assert!(!is_legal(Logging, Recovery));
        assert!(!is_legal(Sleep, Standby));
    }

    #[test]
    fn test_session_lifecycle() {
        let registry = SessionRegistry::new();
        let ty = LoggingType::Aries;
        assert_eq!(registry.mode(ty), LoggingMode::Invalid);

        let _wake = registry.begin_session(ty, Path::new("/tmp/a.log"), strategy()).unwrap();
        registry.transition(ty, LoggingMode::Standby).unwrap();
        assert!(registry.begin_session(ty, Path::new("/tmp/b.log"), strategy()).is_err());
        assert!(matches!(
            registry.transition(ty, LoggingMode::Logging),
            Err(TileLogError::InvalidTransition { .. })
        ));

        registry.transition(ty, LoggingMode::Recovery).unwrap();
        registry.transition(ty, LoggingMode::Logging).unwrap();
        registry.terminate(ty).unwrap();
        registry.finish(ty).unwrap();

        assert_eq!(
            registry.mode_history(ty),
            vec![
                LoggingMode::Invalid,
                LoggingMode::Standby,
                LoggingMode::Recovery,
                LoggingMode::Logging,
                LoggingMode::Terminate,
                LoggingMode::Sleep,
            ]
        );
        assert_eq!(registry.active_count(), 0);
        registry.wait_for_mode(ty, LoggingMode::Terminate).unwrap();
    }

    #[test]
    fn test_shared_log_file_rejected() {
        let registry = SessionRegistry::new();
        let _wake = registry
            .begin_session(LoggingType::Aries, Path::new("/tmp/shared.log"), strategy())
            .unwrap();
        let result =
            registry.begin_session(LoggingType::Alternative, Path::new("/tmp/shared.log"), strategy());
        assert!(matches!(result, Err(TileLogError::Config(_))));
    }

    #[test]
    fn test_fail_wakes_waiters() {
        let registry = Arc::new(SessionRegistry::new());
        let ty = LoggingType::Aries;
        let _wake = registry.begin_session(ty, Path::new("/tmp/c.log"), strategy()).unwrap();

        let waiter = {
            let registry = registry.clone();
            thread::spawn(move || registry.wait_for_mode(ty, LoggingMode::Logging))
        };
        thread::sleep(Duration::from_millis(10));
        registry.fail(ty, "cannot open");

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(TileLogError::SessionFailed { .. })));
        assert_eq!(registry.mode(ty), LoggingMode::Sleep);
        assert_eq!(registry.failure(ty).as_deref(), Some("cannot open"));
    }

    #[test]
    fn test_waiter_released_when_mode_skipped() {
        let registry = Arc::new(SessionRegistry::new());
        let ty = LoggingType::Alternative;
        let _wake = registry.begin_session(ty, Path::new("/tmp/f.log"), strategy()).unwrap();
        registry.transition(ty, LoggingMode::Standby).unwrap();

        let waiter = {
            let registry = registry.clone();
            thread::spawn(move || registry.wait_for_mode(ty, LoggingMode::Logging))
        };
        thread::sleep(Duration::from_millis(10));
        registry.terminate(ty).unwrap();
        registry.finish(ty).unwrap();

        let result = waiter.join().unwrap();
        assert!(matches!(
            result,
            Err(TileLogError::SessionEnded { target: LoggingMode::Logging, mode, .. })
                if mode >= LoggingMode::Terminate
        ));
        assert!(!registry.is_live(ty));

        // Modes the session did pass through still count as reached
        registry.wait_for_mode(ty, LoggingMode::Standby).unwrap();
        assert!(matches!(
            registry.wait_for_mode(ty, LoggingMode::Recovery),
            Err(TileLogError::SessionEnded { .. })
        ));
    }

    #[test]
    fn test_redo_all_pending_and_standby_only() {
        let registry = SessionRegistry::new();
        let ty = LoggingType::Alternative;

        registry.set_redo_all(ty, true).unwrap();
        assert!(registry.redo_all(ty));

        let _wake = registry.begin_session(ty, Path::new("/tmp/d.log"), strategy()).unwrap();
        registry.transition(ty, LoggingMode::Standby).unwrap();
        assert!(registry.redo_all(ty));
        registry.set_redo_all(ty, false).unwrap();
        assert!(!registry.redo_all(ty));

        registry.transition(ty, LoggingMode::Recovery).unwrap();
        assert!(matches!(
            registry.set_redo_all(ty, true),
            Err(TileLogError::InvalidTransition { .. })
        ));
        assert!(registry.reset().is_err());
    }

    #[test]
    fn test_register_requires_logging() {
        let registry = SessionRegistry::new();
        let ty = LoggingType::Aries;
        assert!(matches!(
            registry.register_backend(ty),
            Err(TileLogError::NotLogging { .. })
        ));

        let _wake = registry.begin_session(ty, Path::new("/tmp/e.log"), strategy()).unwrap();
        registry.transition(ty, LoggingMode::Standby).unwrap();
        registry.transition(ty, LoggingMode::Recovery).unwrap();
        registry.transition(ty, LoggingMode::Logging).unwrap();

        let first = registry.register_backend(ty).unwrap();
        let again = registry.register_backend(ty).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(registry.backend_count(ty), 1);

        registry.remove_backend(&first).unwrap();
        assert_eq!(registry.backend_count(ty), 0);
        assert!(matches!(
            registry.remove_backend(&first),
            Err(TileLogError::UnknownLogger(_))
        ));
    }
}
