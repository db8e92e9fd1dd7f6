//! Log reader for recovery

use super::record::{Frame, LogRecord, CRC_SIZE, HEADER_SIZE};
use crate::{Result, TileLogError};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Result of scanning a log file
#[derive(Debug, Default)]
pub struct LogScan {
    /// Records in file order, with the byte offset of each frame
    pub records: Vec<(u64, LogRecord)>,
    /// Length of the well-formed prefix
    pub valid_len: u64,
    /// Bytes discarded as a torn tail
    pub torn_bytes: u64,
}

/// Reads the durable sink from the start
pub struct LogReader {
    path: PathBuf,
}

impl LogReader {
    /// Create a new log reader
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the sink
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every complete record, discarding a torn tail
    pub fn read_all(&self) -> Result<LogScan> {
        let mut file = File::open(&self.path).map_err(|e| {
            TileLogError::Config(format!("cannot open log file {:?}: {}", self.path, e))
        })?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let scan = Self::scan(&data)?;
        info!(
            "Read {} records from {:?} ({} bytes)",
            scan.records.len(),
            self.path,
            scan.valid_len
        );
        if scan.torn_bytes > 0 {
            warn!(
                "Discarded {} torn bytes at offset {} in {:?}",
                scan.torn_bytes, scan.valid_len, self.path
            );
        }
        Ok(scan)
    }

    /// Length of the well-formed prefix of the file, or 0 if it does not exist
    pub fn valid_prefix_len(path: &Path) -> Result<u64> {
        let mut data = Vec::new();
        match File::open(path) {
            Ok(mut file) => {
                file.read_to_end(&mut data)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        }
        Ok(Self::scan(&data)?.valid_len)
    }

    /// Decode frames from an in-memory copy of the sink
    pub fn scan(data: &[u8]) -> Result<LogScan> {
        let mut scan = LogScan::default();
        let mut offset = 0;

        while offset < data.len() {
            match LogRecord::decode_frame(&data[offset..]) {
                Ok(Frame::Record(record, bytes_read)) => {
                    scan.records.push((offset as u64, record));
                    offset += bytes_read;
                }
                Ok(Frame::Truncated) => {
                    // Incomplete frame at end (crash during append)
                    break;
                }
                Err(e) if Self::is_tail(data, offset) => {
                    warn!("Unreadable final frame at offset {}: {}", offset, e);
                    break;
                }
                Err(e) => {
                    return Err(TileLogError::ReplayCorruption {
                        offset: offset as u64,
                        reason: e.to_string(),
                    });
                }
            }
        }

        scan.valid_len = offset as u64;
        scan.torn_bytes = (data.len() - offset) as u64;
        Ok(scan)
    }

    /// Whether the frame at `offset` is the last thing in the file, so a
    /// failure to decode it is a partial write rather than corruption.
    ///
    /// Only a frame with an intact header can be judged the last one.
    fn is_tail(data: &[u8], offset: usize) -> bool {
        let rest = &data[offset..];
        if rest.iter().all(|b| *b == 0) {
            return true;
        }
        match LogRecord::frame_body_len(rest) {
            Ok(Some(body_len)) => {
                HEADER_SIZE.saturating_add(body_len).saturating_add(CRC_SIZE) >= rest.len()
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }
}
