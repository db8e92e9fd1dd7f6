//! Flush and commit-coupling policy per logging type

use crate::wal::{LogConfig, LogRecord};
use crate::LoggingType;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What distinguishes the logging protocol variants.
///
/// Chosen once when a session enters STANDBY; the flush loop and the
/// transaction commit path only ever consult this trait.
pub trait LoggingStrategy: Send + Sync + fmt::Debug {
    /// The variant this strategy implements
    fn logging_type(&self) -> LoggingType;

    /// Longest the frontend sleeps between drains
    fn flush_interval(&self) -> Duration;

    /// Whether emitting `record` should wake the frontend immediately
    fn nudge_on(&self, record: &LogRecord) -> bool;

    /// Whether a commit is acknowledged only after its records are durable
    fn commit_waits_for_durability(&self) -> bool;
}

/// Force-at-commit
#[derive(Debug, Clone)]
pub struct AriesStrategy {
    interval: Duration,
}

impl AriesStrategy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl LoggingStrategy for AriesStrategy {
    fn logging_type(&self) -> LoggingType {
        LoggingType::Aries
    }

    fn flush_interval(&self) -> Duration {
        self.interval
    }

    fn nudge_on(&self, record: &LogRecord) -> bool {
        record.is_terminal()
    }

    fn commit_waits_for_durability(&self) -> bool {
        true
    }
}

/// Write-behind group commit
#[derive(Debug, Clone)]
pub struct AlternativeStrategy {
    interval: Duration,
}

impl AlternativeStrategy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl LoggingStrategy for AlternativeStrategy {
    fn logging_type(&self) -> LoggingType {
        LoggingType::Alternative
    }

    fn flush_interval(&self) -> Duration {
        self.interval
    }

    fn nudge_on(&self, _record: &LogRecord) -> bool {
        false
    }

    fn commit_waits_for_durability(&self) -> bool {
        false
    }
}

/// Strategy for a logging type under `config`
pub fn strategy_for(logging_type: LoggingType, config: &LogConfig) -> Arc<dyn LoggingStrategy> {
    match logging_type {
        LoggingType::Aries => Arc::new(AriesStrategy::new(config.aries_flush_interval())),
        LoggingType::Alternative => {
            Arc::new(AlternativeStrategy::new(config.alternative_flush_interval()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransactionId;

    #[test]
    fn test_strategy_selection() {
        let config = LogConfig::default();

        let aries = strategy_for(LoggingType::Aries, &config);
        assert_eq!(aries.logging_type(), LoggingType::Aries);
        assert!(aries.commit_waits_for_durability());
        assert!(aries.nudge_on(&LogRecord::commit(TransactionId(1))));
        assert!(!aries.nudge_on(&LogRecord::begin(TransactionId(1))));

        let alternative = strategy_for(LoggingType::Alternative, &config);
        assert!(!alternative.commit_waits_for_durability());
        assert!(!alternative.nudge_on(&LogRecord::commit(TransactionId(1))));
        assert!(alternative.flush_interval() > aries.flush_interval());
    }
}
