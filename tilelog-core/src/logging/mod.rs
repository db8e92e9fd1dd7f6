//! Logging subsystem
//!
//! Transaction threads emit records into their own [`BackendLogger`]. One
//! frontend logger per [`LoggingType`](crate::LoggingType) drains them in
//! batches, appends to the sink and forces it durable, then wakes anyone
//! waiting on those records. The [`LogManager`] drives the session mode
//! state machine and hands out backend loggers.

mod backend;
mod frontend;
mod manager;
mod recovery;
mod session;
mod strategy;

pub use backend::BackendLogger;
pub use manager::LogManager;
pub use recovery::{RecoveryStats, Replayer};
pub use strategy::{strategy_for, AlternativeStrategy, AriesStrategy, LoggingStrategy};
