//! Error types for tilelog

use crate::{LoggingMode, LoggingType, Oid, TupleLocation};
use thiserror::Error;

/// Result type alias for tilelog operations
pub type Result<T> = std::result::Result<T, TileLogError>;

/// tilelog error types
#[derive(Error, Debug)]
pub enum TileLogError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Sink cannot be opened, or configuration changed under a live session
    #[error("Configuration error: {0}")]
    Config(String),

    /// Mode transition not permitted from the current mode
    #[error("Invalid transition for {logging_type}: {from} -> {to}")]
    InvalidTransition {
        logging_type: LoggingType,
        from: LoggingMode,
        to: LoggingMode,
    },

    /// Backend logger requested outside LOGGING mode
    #[error("{logging_type} is not in logging mode (current mode: {mode})")]
    NotLogging {
        logging_type: LoggingType,
        mode: LoggingMode,
    },

    /// Backend logger is not registered with the manager
    #[error("Unknown backend logger: {0}")]
    UnknownLogger(u64),

    /// Malformed record in the interior of the sink
    #[error("Replay corruption at offset {offset}: {reason}")]
    ReplayCorruption { offset: u64, reason: String },

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Log record built with fields that do not fit its kind
    #[error("Invalid log record: {0}")]
    InvalidRecord(String),

    /// Records could not be made durable
    #[error("Durability failure: {0}")]
    Durability(String),

    /// The logging session ended without reaching the awaited state
    #[error("Logging session for {logging_type} failed: {reason}")]
    SessionFailed {
        logging_type: LoggingType,
        reason: String,
    },

    /// The logging session moved past the awaited mode without entering it
    #[error("Logging session for {logging_type} is in {mode} and will not reach {target}")]
    SessionEnded {
        logging_type: LoggingType,
        target: LoggingMode,
        mode: LoggingMode,
    },

    /// Database not found
    #[error("Database not found: {0}")]
    DatabaseNotFound(Oid),

    /// Table not found
    #[error("Table not found: {table_id} in database {database_id}")]
    TableNotFound { database_id: Oid, table_id: Oid },

    /// Tuple slot empty or out of range
    #[error("Tuple not found at {0}")]
    TupleNotFound(TupleLocation),

    /// Tuple does not match its table's schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
}

impl TileLogError {
    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            TileLogError::ReplayCorruption { .. } | TileLogError::ChecksumMismatch { .. }
        )
    }
}
