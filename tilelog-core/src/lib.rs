//! tilelog Core - write-ahead logging and crash recovery
//!
//! Durably records every committed insert/update/delete of an in-memory
//! tile-group store so that, after a crash, replaying the log rebuilds
//! exactly the effects of committed transactions.
//!
//! # Architecture
//!
//! - **LogRecord** (`wal`): immutable BEGIN/COMMIT/ABORT/INSERT/UPDATE/DELETE
//!   entries, framed with a length prefix and CRC32 in the sink
//! - **BackendLogger** (`logging`): one per transaction thread, buffers that
//!   thread's records and offers a durability wait
//! - **FrontendLogger** (`logging`): single consumer per logging type that
//!   drains backends, appends and fsyncs, and replays the sink on recovery
//! - **LogManager** (`logging`): owns the per-type mode state machine
//!   (INVALID → STANDBY → RECOVERY → LOGGING → TERMINATE → SLEEP) and the
//!   backend registry

pub mod logging;
pub mod storage;
pub mod transaction;
pub mod wal;
pub mod workload;

mod error;
mod types;

pub use error::{Result, TileLogError};
pub use types::*;

/// tilelog version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Default directory for the sinks
    pub const DEFAULT_LOG_DIR: &str = "/tmp";

    /// ARIES frontend wakes at least this often (ms)
    pub const ARIES_FLUSH_INTERVAL_MS: u64 = 5;

    /// ALTERNATIVE group-commit window (ms)
    pub const ALTERNATIVE_FLUSH_INTERVAL_MS: u64 = 50;

    /// Largest record body accepted when reading the sink (64MB)
    pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

    /// Slots per tile group
    pub const TUPLES_PER_TILE_GROUP: u32 = 10;
}
