//! Write-Ahead Log (WAL) sink
//!
//! Every committed mutation is appended here as a framed, checksummed
//! record before (ARIES) or shortly after (ALTERNATIVE) its commit is
//! acknowledged. On restart the sink is scanned from the start and replayed.

mod reader;
mod record;
mod writer;

pub use reader::{LogReader, LogScan};
pub use record::{Frame, LogRecord, LogRecordType, TupleHeader};
pub use writer::LogWriter;

use crate::LoggingType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory holding each logging type's default sink
    pub log_dir: PathBuf,
    /// Sinks set explicitly for a logging type, overriding `log_dir`
    pub log_files: HashMap<LoggingType, PathBuf>,
    /// Upper bound on emission-to-durability latency for ARIES
    pub aries_flush_interval_ms: u64,
    /// Group-commit window for the ALTERNATIVE variant
    pub alternative_flush_interval_ms: u64,
}

impl LogConfig {
    /// Configuration keeping every sink in `log_dir`, with default cadences
    pub fn in_dir(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Default::default()
        }
    }

    /// Sink of `logging_type`
    pub fn log_file(&self, logging_type: LoggingType) -> PathBuf {
        match self.log_files.get(&logging_type) {
            Some(path) => path.clone(),
            None => self.log_dir.join(logging_type.default_log_file_name()),
        }
    }

    /// ARIES flush interval
    pub fn aries_flush_interval(&self) -> Duration {
        Duration::from_millis(self.aries_flush_interval_ms.max(1))
    }

    /// ALTERNATIVE flush interval
    pub fn alternative_flush_interval(&self) -> Duration {
        Duration::from_millis(self.alternative_flush_interval_ms.max(1))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(crate::config::DEFAULT_LOG_DIR),
            log_files: HashMap::new(),
            aries_flush_interval_ms: crate::config::ARIES_FLUSH_INTERVAL_MS,
            alternative_flush_interval_ms: crate::config::ALTERNATIVE_FLUSH_INTERVAL_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_per_type() {
        let mut config = LogConfig::in_dir("/var/tilelog");
        assert_eq!(
            config.log_file(LoggingType::Aries),
            PathBuf::from("/var/tilelog/aries.log")
        );
        assert_eq!(
            config.log_file(LoggingType::Alternative),
            PathBuf::from("/var/tilelog/alternative.log")
        );

        config
            .log_files
            .insert(LoggingType::Alternative, PathBuf::from("/data/alt.log"));
        assert_eq!(
            config.log_file(LoggingType::Alternative),
            PathBuf::from("/data/alt.log")
        );
        assert_eq!(
            config.log_file(LoggingType::Aries),
            PathBuf::from("/var/tilelog/aries.log")
        );
    }

    #[test]
    fn test_config_json() {
        let config: LogConfig = serde_json::from_str(
            r#"{"log_dir": "/logs", "log_files": {"aries": "/fast/aries.wal"}}"#,
        )
        .unwrap();
        assert_eq!(config.log_file(LoggingType::Aries), PathBuf::from("/fast/aries.wal"));
        assert_eq!(
            config.log_file(LoggingType::Alternative),
            PathBuf::from("/logs/alternative.log")
        );
        assert_eq!(config.aries_flush_interval_ms, crate::config::ARIES_FLUSH_INTERVAL_MS);
    }
}
